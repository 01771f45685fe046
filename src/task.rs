//! The task descriptor (TCB) and its dynamic scheduling state.

use crate::arch::{Arch, EntryFn, STACK_FILL_PATTERN};
use crate::events::EventSet;
use crate::time::TickWidth;

/// Which of the three mutually exclusive scheduler states a task currently
/// occupies. Tracked explicitly as a field rather than inferred from index
/// membership, so the invariant can be asserted directly.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Location {
    Active,
    Ready,
    Suspended,
}

/// A raw, non-owning view of a task's stack memory. The kernel never
/// allocates; this points at a `'static` buffer the application owns and
/// hands over at `init_task` time.
pub struct StackRegion {
    base: *mut u8,
    len: usize,
}

// Safety: exactly one task (or the kernel performing bookkeeping on its
// behalf inside a critical section) ever touches a given task's stack at a
// time; tasks never migrate between cores (this kernel has no SMP support).
unsafe impl Send for StackRegion {}

impl StackRegion {
    pub fn new(buf: &'static mut [u8]) -> Self {
        StackRegion {
            base: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// Caller must not alias this with any other live reference to the same
    /// stack memory.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.base, self.len)
    }
}

/// One configured task: static configuration plus the dynamic fields the
/// scheduler mutates under critical-section protection.
pub struct Task<W: TickWidth, A: Arch> {
    configured: bool,
    pub(crate) location: Location,
    pub(crate) priority: u8,

    pub(crate) posted: EventSet,
    pub(crate) wait_mask: EventSet,
    pub(crate) wait_all: bool,

    pub(crate) time_due_at: W,
    pub(crate) delay_ticks: u32,
    pub(crate) round_robin_remaining: u16,

    pub(crate) overrun_count: u32,
    /// The bitmask delivered to this task the last time it was released.
    /// In a real build, the arch trampoline reads this into the task's
    /// return-value register on the way back to user code.
    pub(crate) last_release: EventSet,

    stack: Option<StackRegion>,
    pub(crate) save: A::SavedState,
}

impl<W: TickWidth, A: Arch> Default for Task<W, A> {
    fn default() -> Self {
        Task {
            configured: false,
            location: Location::Suspended,
            priority: 0,
            posted: EventSet::EMPTY,
            wait_mask: EventSet::EMPTY,
            wait_all: false,
            time_due_at: W::default(),
            delay_ticks: 0,
            round_robin_remaining: 0,
            overrun_count: 0,
            last_release: EventSet::EMPTY,
            stack: None,
            save: A::SavedState::default(),
        }
    }
}

impl<W: TickWidth, A: Arch> Task<W, A> {
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn overrun_count(&self) -> u32 {
        self.overrun_count
    }

    pub fn reset_overrun_count(&mut self) {
        self.overrun_count = 0;
    }

    pub fn last_release(&self) -> EventSet {
        self.last_release
    }

    pub fn stack_region(&self) -> Option<&StackRegion> {
        self.stack.as_ref()
    }

    /// Configures this task's static fields and prepares its stack. Called
    /// once, before the kernel starts; static fields are immutable
    /// thereafter.
    pub(crate) fn configure(
        &mut self,
        priority: u8,
        stack: &'static mut [u8],
        entry: EntryFn,
        start_event: u16,
    ) {
        for byte in stack.iter_mut() {
            *byte = STACK_FILL_PATTERN;
        }
        let save = A::initialize_stack(&mut *stack, entry, start_event);
        self.priority = priority;
        self.save = save;
        self.stack = Some(StackRegion::new(stack));
        self.configured = true;
    }
}
