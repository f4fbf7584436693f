//! Page fault error code as pushed by the CPU on vector 14.
//!
//! The bit layout is fixed by hardware:
//!
//! ```text
//!   bit 0 == 0: no page found          1: protection fault
//!   bit 1 == 0: read access            1: write access
//!   bit 2 == 0: kernel-mode access     1: user-mode access
//!   bit 3 ==                           1: use of reserved bit detected
//!   bit 4 ==                           1: fault was an instruction fetch
//!   bit 5 ==                           1: protection keys block access
//! ```

use bitflags::bitflags;

/// Exception vector for #PF.
pub const TRAP_PAGE_FAULT: u8 = 14;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PageFaultCode: u64 {
        /// The translation was present; the access violated its permissions.
        const PROT  = 1 << 0;
        const WRITE = 1 << 1;
        /// The access was made with user privilege.
        const USER  = 1 << 2;
        /// A reserved bit was set in some level of the translation chain.
        const RSVD  = 1 << 3;
        const INSTR = 1 << 4;
        /// A protection key denied the access.
        const PK    = 1 << 5;
    }
}

impl PageFaultCode {
    /// Decode the raw error code, keeping only the architecturally defined bits.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self::from_bits_truncate(raw)
    }

    #[inline]
    pub const fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    #[inline]
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    #[inline]
    pub const fn is_instruction_fetch(self) -> bool {
        self.contains(Self::INSTR)
    }

    #[inline]
    pub const fn is_protection_violation(self) -> bool {
        self.contains(Self::PROT)
    }
}
