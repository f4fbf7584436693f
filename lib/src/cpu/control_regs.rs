//! Control register access (CR2, CR3, CR4) and the PKRU register.

use bitflags::bitflags;
use core::arch::asm;
use x86_64::registers::control::Cr2;

// =============================================================================
// CR2 (page fault linear address, read-only)
// =============================================================================

#[inline(always)]
pub fn read_cr2() -> u64 {
    Cr2::read_raw()
}

// =============================================================================
// CR3 (translation root)
// =============================================================================

/// Physical address bits of CR3 (PCID and flag bits stripped).
pub const CR3_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

#[inline(always)]
pub fn read_cr3() -> u64 {
    let value: u64;
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

// =============================================================================
// CR4
// =============================================================================

bitflags! {
    /// CR4 bits consulted by the fault path.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Cr4Flags: u64 {
        /// 57-bit Linear Addresses (5-level paging).
        const LA57 = 1 << 12;
        /// Supervisor Mode Execution Prevention.
        const SMEP = 1 << 20;
        /// Supervisor Mode Access Prevention.
        const SMAP = 1 << 21;
        /// Protection Key Enable.
        const PKE = 1 << 22;
    }
}

#[inline(always)]
pub fn read_cr4() -> u64 {
    let value: u64;
    unsafe {
        asm!("mov {}, cr4", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

#[inline(always)]
pub fn read_cr4_flags() -> Cr4Flags {
    Cr4Flags::from_bits_truncate(read_cr4())
}

// =============================================================================
// PKRU
// =============================================================================

/// Read the protection-key rights register.
///
/// Only valid once `CR4.PKE` is set; RDPKRU raises #UD otherwise.
#[inline(always)]
pub fn read_pkru() -> u32 {
    let eax: u32;
    unsafe {
        asm!(
            "rdpkru",
            in("ecx") 0u32,
            out("eax") eax,
            out("edx") _,
            options(nomem, nostack, preserves_flags),
        );
    }
    eax
}
