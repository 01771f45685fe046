//! Host simulator backend. Used for development and by this crate's own
//! test suite; it never runs real task code, it only has to satisfy the
//! `Arch` contract well enough to exercise the scheduler's state machine.
//!
//! There is no real stack to unwind on the host, so `initialize_stack`
//! records the entry point and start event instead of a byte-accurate
//! call frame, and `dispatch` is never actually invoked by the test suite --
//! tests drive `Kernel`'s scheduling methods directly and assert on its
//! state without needing a real CPU.

use super::{Arch, CriticalToken, EntryFn};

#[derive(Clone, Debug, Default)]
pub struct SimSavedState {
    pub entry: Option<EntryFn>,
    pub start_event: u16,
}

/// The simulator has no real interrupt mask to save; nesting detection is
/// `Kernel::critical`'s job; a real backend's token would carry the prior
/// interrupt-enable bit here instead of nothing.
#[derive(Copy, Clone)]
pub struct SimToken;
impl CriticalToken for SimToken {}

/// Marker type selecting the simulator backend.
pub struct Sim;

impl Arch for Sim {
    type SavedState = SimSavedState;
    type Token = SimToken;

    fn initialize_stack(
        stack: &mut [u8],
        entry: EntryFn,
        start_event: u16,
    ) -> Self::SavedState {
        // Real backends lay down a call frame here; the simulator just
        // records enough to prove initialization ran, and leaves the
        // prefill pattern from `Kernel::init_task` untouched so
        // `diag::stack_reserve` has something real to scan.
        let _ = stack;
        SimSavedState {
            entry: Some(entry),
            start_event,
        }
    }

    fn enter_critical() -> Self::Token {
        SimToken
    }

    unsafe fn leave_critical(_token: Self::Token) {}
}
