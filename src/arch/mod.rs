//! The target-dependent context-switch contract.
//!
//! Everything above this module is portable. An `Arch` implementation is an
//! external collaborator: it is handed a source and destination
//! saved-state and performs the register save/restore, and it seeds a task's
//! stack so that its first restore enters the task's entry function.
//!
//! The wait/post services never run as naked/no-prologue functions.
//! `Kernel` computes an ordinary Rust value describing what should happen
//! next (who to resume); only `Arch::dispatch` -- the single, small
//! trampoline that a real board-support layer provides -- touches raw
//! registers.

cfg_if::cfg_if! {
    if #[cfg(feature = "sim")] {
        mod sim;
        pub use sim::Sim;
    }
}

/// Logs a kernel diagnostic event. Dispatched per backend: the simulator
/// prints to stderr (there is no other sink on a host); a silicon build with
/// no logging sink compiled in drops the message entirely, formatting
/// nothing and paying no flash cost for it.
#[cfg(feature = "sim")]
#[macro_export]
macro_rules! klog {
    ($s:expr) => { std::eprintln!($s) };
    ($s:expr, $($tt:tt)*) => { std::eprintln!($s, $($tt)*) };
}

#[cfg(not(feature = "sim"))]
#[macro_export]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

#[cfg(all(feature = "avr", target_arch = "avr"))]
mod avr;
#[cfg(all(feature = "avr", target_arch = "avr"))]
pub use avr::Avr;

/// Byte written across the unused portion of every task's stack at
/// initialization, so `diag::stack_reserve` can scan for the high-water
/// mark. Chosen to be an unlikely byte to appear in real stack contents.
pub const STACK_FILL_PATTERN: u8 = 0xA5;

/// An entry function: takes the task's start event and never returns. A
/// function pointer, not a trait object -- tasks are polymorphic only over
/// this one signature, not a virtual interface.
pub type EntryFn = fn(u16) -> !;

/// The idle loop entry point. Idle has no `Task` slot, no stack, and no
/// saved state of its own to restore into, so unlike a real task its entry
/// is invoked directly rather than through `initialize_stack`/dispatch.
pub type IdleFn = fn() -> !;

/// An opaque critical-section token. `Arch` implementations may wrap
/// whatever prior-interrupt-mask representation their hardware needs; the
/// core never inspects it, only threads it back through `leave_critical`.
pub trait CriticalToken: Copy {}

/// The external collaborator contract: the context-switch and
/// stack-initialization primitives every backend must supply.
pub trait Arch {
    /// Saved machine state for one task: whatever registers and stack
    /// pointer must survive a context switch.
    type SavedState: Default + Clone;
    type Token: CriticalToken;

    /// Seeds `stack` so that restoring the returned `SavedState` enters
    /// `entry(start_event)`. The low end of `stack` is prefilled with
    /// [`STACK_FILL_PATTERN`] first by the caller; this only needs to lay
    /// down the initial frame at the high end.
    ///
    /// Must embed a synthetic return address that traps (resets the
    /// controller, or an equivalent fault) if `entry` ever returns -- a task
    /// function returning is always fatal.
    fn initialize_stack(
        stack: &mut [u8],
        entry: EntryFn,
        start_event: u16,
    ) -> Self::SavedState;

    /// Masks exactly the interrupts that can post events or tick the clock.
    /// Must not rely on a global interrupt disable if finer-grained masking
    /// is available. The core never nests this call.
    fn enter_critical() -> Self::Token;

    /// Restores the interrupt mask captured by a matching `enter_critical`.
    ///
    /// # Safety
    ///
    /// `token` must be the value most recently returned by `enter_critical`
    /// on this core; the core upholds this by construction (see
    /// [`crate::sched::Kernel::critical`]).
    unsafe fn leave_critical(token: Self::Token);
}
