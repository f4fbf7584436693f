//! Signal ABI produced by the fault path.
//!
//! Only the synchronous fault signals and the sub-codes (`si_code`) that the
//! page fault handler reports are defined here.

use crate::addr::VirtAddr;

// =============================================================================
// Signal numbers (Linux-compatible subset)
// =============================================================================

pub const SIGILL: u8 = 4;
pub const SIGBUS: u8 = 7;
pub const SIGKILL: u8 = 9;
pub const SIGSEGV: u8 = 11;

// =============================================================================
// SIGSEGV sub-codes
// =============================================================================

/// Address not mapped to object.
pub const SEGV_MAPERR: i32 = 1;
/// Invalid permissions for mapped object.
pub const SEGV_ACCERR: i32 = 2;
/// Failed protection key checks.
pub const SEGV_PKUERR: i32 = 4;

/// Illegal opcode (`SIGILL`).
pub const ILL_ILLOPN: i32 = 2;

// =============================================================================
// SIGBUS sub-codes
// =============================================================================

/// Non-existent physical address.
pub const BUS_ADRERR: i32 = 2;
/// Hardware memory error consumed on a machine check: action required.
pub const BUS_MCEERR_AR: i32 = 4;

/// Everything a fault-generated signal carries to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSigInfo {
    pub signo: u8,
    pub code: i32,
    pub addr: VirtAddr,
    /// Protection key that denied the access (`SEGV_PKUERR` only).
    pub pkey: Option<u16>,
    /// log2 of the poisoned extent (`BUS_MCEERR_AR` only).
    pub addr_lsb: Option<u8>,
}

impl FaultSigInfo {
    #[inline]
    pub const fn new(signo: u8, code: i32, addr: VirtAddr) -> Self {
        Self {
            signo,
            code,
            addr,
            pkey: None,
            addr_lsb: None,
        }
    }

    #[inline]
    pub const fn with_pkey(mut self, pkey: u16) -> Self {
        self.pkey = Some(pkey);
        self
    }

    #[inline]
    pub const fn with_addr_lsb(mut self, lsb: u8) -> Self {
        self.addr_lsb = Some(lsb);
        self
    }
}

pub const fn signal_name(signo: u8) -> &'static str {
    match signo {
        SIGILL => "SIGILL",
        SIGBUS => "SIGBUS",
        SIGKILL => "SIGKILL",
        SIGSEGV => "SIGSEGV",
        _ => "SIG?",
    }
}
