//! Page table flags and paging constants.

use bitflags::bitflags;

bitflags! {
    /// x86_64 page table entry flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64 {
        /// Page is present in memory (bit 0).
        const PRESENT       = 1 << 0;
        /// Page is writable (otherwise read-only) (bit 1).
        const WRITABLE      = 1 << 1;
        /// Page is accessible from user mode (ring 3) (bit 2).
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        /// Page is 2MB (PDE) or 1GB (PDPTE) huge page (bit 7).
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        /// Protection key, bits 59-62 (leaf entries only).
        const PKEY_BIT0     = 1 << 59;
        const PKEY_BIT1     = 1 << 60;
        const PKEY_BIT2     = 1 << 61;
        const PKEY_BIT3     = 1 << 62;
        /// Disable instruction fetch from this page (bit 63).
        const NO_EXECUTE    = 1 << 63;

        // =====================================================================
        // Convenience Combinations
        // =====================================================================

        /// Intermediate kernel table entry.
        const KERNEL_TABLE = Self::PRESENT.bits() | Self::WRITABLE.bits();
        /// Intermediate user table entry.
        const USER_TABLE = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
        const KERNEL_RW = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::NO_EXECUTE.bits();
        const KERNEL_RO = Self::PRESENT.bits() | Self::NO_EXECUTE.bits();
        const KERNEL_RX = Self::PRESENT.bits();
        const USER_RW = Self::USER_TABLE.bits() | Self::NO_EXECUTE.bits();
    }
}

impl PageFlags {
    /// Bits 12-51 contain the 4KB-aligned physical address.
    pub const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    pub const PKEY_SHIFT: u32 = 59;
    pub const PKEY_MASK: u64 = 0xF << Self::PKEY_SHIFT;

    #[inline]
    pub const fn extract_address(pte: u64) -> u64 {
        pte & Self::ADDRESS_MASK
    }

    #[inline]
    pub const fn extract_pkey(pte: u64) -> u16 {
        ((pte & Self::PKEY_MASK) >> Self::PKEY_SHIFT) as u16
    }

    #[inline]
    pub const fn from_pkey(pkey: u16) -> Self {
        Self::from_bits_truncate(((pkey as u64) << Self::PKEY_SHIFT) & Self::PKEY_MASK)
    }
}

// =============================================================================
// Page Sizes
// =============================================================================

pub const PAGE_SHIFT: u8 = 12;
pub const PAGE_SIZE_4KB: u64 = 0x1000;
pub const PAGE_SIZE_2MB: u64 = 0x20_0000;
pub const PAGE_SIZE_1GB: u64 = 0x4000_0000;

pub const PMD_SHIFT: u8 = 21;
pub const PUD_SHIFT: u8 = 30;
