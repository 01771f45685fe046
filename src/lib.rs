//! A small cooperative/preemptive real-time kernel core for single-core
//! eight-bit microcontrollers: a priority-based scheduler with optional
//! round-robin time slicing, unified around a 16-bit event-vector
//! abstraction that subsumes timers, broadcast signals, mutexes, and
//! semaphores.
//!
//! This crate covers the hard core only: the scheduler and the
//! event/timer/synchronization state machine. Board bring-up, peripheral
//! drivers, and the architecture-specific register save/restore trampoline
//! are external collaborators, represented here by the [`arch::Arch`] trait.
//!
//! ```
//! use avrtos::arch::Sim;
//! use avrtos::events::{EventConfig, EventSet};
//! use avrtos::sched::Kernel;
//!
//! const NTASKS: usize = 2;
//! type K = Kernel<Sim, u16, NTASKS, 2, 4, 1, 1, false>;
//!
//! static mut HI_STACK: [u8; 64] = [0; 64];
//! static mut LO_STACK: [u8; 64] = [0; 64];
//!
//! let mut kernel: K = Kernel::new(EventConfig::new(1, 1), 0);
//! unsafe {
//!     kernel.init_task(0, 1, |_| loop {}, &mut HI_STACK, EventSet::EMPTY, false, 0, 0);
//!     kernel.init_task(1, 0, |_| loop {}, &mut LO_STACK, EventSet::EMPTY, false, 0, 0);
//! }
//! assert_eq!(kernel.active(), K::IDLE);
//! ```

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

#[cfg(any(test, feature = "sim"))]
extern crate std;

pub mod arch;
pub mod diag;
mod err;
pub mod events;
pub mod sched;
pub mod task;
pub mod time;

pub use events::{EventConfig, EventSet};
pub use sched::{Hooks, Kernel, NextTask, WaitOutcome};
pub use task::{Location, Task};
pub use time::{CyclicOrder, TickWidth};
