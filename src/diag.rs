//! Read-only diagnostics: stack headroom and overrun counts.
//! Both are approximate/cheap and never feed back into scheduling decisions.

use crate::arch::{Arch, STACK_FILL_PATTERN};
use crate::task::Task;
use crate::time::TickWidth;

/// Scans from the low end of `task`'s stack for the first byte that differs
/// from the prefill pattern, returning the count of still-untouched bytes.
/// This is approximate: a task that happens to write the fill pattern back
/// onto its own unused stack will under-report its headroom.
pub fn stack_reserve<W: TickWidth, A: Arch>(task: &Task<W, A>) -> usize {
    let region = match task.stack_region() {
        Some(r) => r,
        None => return 0,
    };
    // Safety: called only from diagnostic contexts outside the task's own
    // execution (the kernel is the only other party that ever touches this
    // memory, and it does so under critical-section protection like every
    // other dynamic field).
    let bytes = unsafe { region.as_mut_slice() };
    bytes
        .iter()
        .take_while(|&&b| b == STACK_FILL_PATTERN)
        .count()
}

#[cfg(test)]
#[allow(clippy::empty_loop)]
mod tests {
    use super::*;
    use crate::arch::Sim;

    #[test]
    fn fully_untouched_stack_reports_full_reserve() {
        let stack: &'static mut [u8] = Box::leak(Box::new([0u8; 64]));
        let mut task = Task::<u16, Sim>::default();
        task.configure(0, stack, |_| loop {}, 0);
        assert_eq!(stack_reserve(&task), 64);
    }

    #[test]
    fn partially_touched_stack_reports_remaining_headroom() {
        let stack: &'static mut [u8] = Box::leak(Box::new([0u8; 64]));
        let mut task = Task::<u16, Sim>::default();
        task.configure(0, stack, |_| loop {}, 0);
        unsafe {
            let bytes = task.stack_region().unwrap().as_mut_slice();
            // Simulate the top 10 bytes having been used by the running
            // task (stack grows down from the high end on most targets).
            for b in bytes.iter_mut().rev().take(10) {
                *b = 0x00;
            }
        }
        assert_eq!(stack_reserve(&task), 54);
    }
}
