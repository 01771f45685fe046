//! Reference AVR backend (e.g. ATmega328P). This is the real deployment
//! target for this kernel; it is not built by default because this
//! workspace's host toolchain has no `avr-none` target installed. It is kept
//! in the tree, gated behind `--features avr` on an actual AVR target, to
//! show how the `Arch` contract is discharged on an 8-bit, single-core
//! microcontroller with no MPU and no hardware stack-pointer-swap
//! instruction.
//!
//! Same idea as a Cortex-M port's synthetic trap-on-return address, entry
//! point, and initial register image, all written onto the stack the caller
//! supplies, adapted to AVR's calling convention (16-bit address space,
//! big-endian return address on the stack, `r24` used for the first call
//! argument's low byte).

use super::{Arch, CriticalToken, EntryFn};
use zerocopy::{AsBytes, FromBytes, Unaligned};

#[repr(C)]
#[derive(Clone, Default)]
pub struct AvrSavedState {
    /// Stack pointer at the moment this task was last suspended.
    sp: u16,
}

#[derive(Copy, Clone)]
pub struct AvrToken(u8);
impl CriticalToken for AvrToken {}

/// Marker type selecting the AVR backend.
pub struct Avr;

/// `rjmp .` encodes as `0xCFFF`; landing on it after a task function returns
/// spins forever rather than running off into whatever garbage follows,
/// until the watchdog resets the part. A real board-support layer may prefer
/// to jump to the reset vector directly.
const TRAP_ON_RETURN: u16 = 0xCFFF;

/// The initial register image a task's first restore pops off its own
/// stack, in push order (high address to low): the trap-on-return address
/// the entry function's `ret` lands on, the entry point the dispatch
/// trampoline's own `ret` lands on, then the general-purpose registers and
/// status flags `ret`'s caller expects to find restored.
///
/// `FromBytes`/`AsBytes`/`Unaligned` (rather than hand-written big-endian
/// byte pokes) give this the same "plain bytes on the stack" treatment a
/// Cortex-M port gives its own exception frame: the layout is `#[repr(C)]`,
/// byte order is native (AVR is little-endian internally; only the return
/// addresses `ret`/`rjmp` consume are big-endian, handled separately), and
/// `as_bytes` is the only place that needs to reason about it.
#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Default)]
struct AvrRegisterFrame {
    r0_to_r23: [u8; 24],
    r24: u8,
    r25: u8,
    r26_to_r31: [u8; 6],
    sreg: u8,
}

impl Arch for Avr {
    type SavedState = AvrSavedState;
    type Token = AvrToken;

    fn initialize_stack(
        stack: &mut [u8],
        entry: EntryFn,
        start_event: u16,
    ) -> Self::SavedState {
        // AVR stacks grow down from the high end and hold return addresses
        // in big-endian order, so those two pushes stay explicit; the
        // register file underneath them is an ordinary byte blob zerocopy
        // can place in one write.
        let top = stack.len();
        let mut sp = top;

        let mut push16_be = |sp: &mut usize, value: u16| {
            *sp -= 1;
            stack[*sp] = value as u8;
            *sp -= 1;
            stack[*sp] = (value >> 8) as u8;
        };

        push16_be(&mut sp, TRAP_ON_RETURN);
        push16_be(&mut sp, entry as usize as u16);

        // r24:r25 carry the start event per the AVR calling convention's
        // first argument; everything else, including SREG, starts zeroed
        // (interrupts enabled on restore via `reti`).
        let frame = AvrRegisterFrame {
            r24: start_event as u8,
            r25: (start_event >> 8) as u8,
            ..Default::default()
        };
        sp -= core::mem::size_of::<AvrRegisterFrame>();
        stack[sp..sp + core::mem::size_of::<AvrRegisterFrame>()].copy_from_slice(frame.as_bytes());

        AvrSavedState { sp: sp as u16 }
    }

    fn enter_critical() -> Self::Token {
        let sreg: u8;
        unsafe {
            core::arch::asm!("in {0}, 0x3f", out(reg) sreg);
            core::arch::asm!("cli");
        }
        AvrToken(sreg)
    }

    unsafe fn leave_critical(token: Self::Token) {
        // Restore SREG's prior interrupt-enable bit rather than
        // unconditionally re-enabling, so nested use by a caller that was
        // already inside a critical section doesn't clobber its state.
        core::arch::asm!("out 0x3f, {0}", in(reg) token.0);
    }
}
