//! Interrupt flag management: sti, cli.

use core::arch::asm;

use crate::kdiag::RFLAGS_IF;

/// Enable interrupts (STI).
#[inline(always)]
pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Disable interrupts (CLI).
#[inline(always)]
pub fn disable_interrupts() {
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Read RFLAGS register without modifying interrupt state.
#[inline(always)]
pub fn read_rflags() -> u64 {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags
}

/// Returns true if interrupts are currently enabled (IF bit set).
#[inline(always)]
pub fn are_interrupts_enabled() -> bool {
    (read_rflags() & RFLAGS_IF) != 0
}
