//! Does a region permit the faulting access?

use faultline_abi::fault::PageFaultCode;
use faultline_abi::signal::{SEGV_ACCERR, SEGV_PKUERR};

use crate::vma_flags::VmaFlags;
use crate::vma_tree::VmaDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessViolation {
    /// A protection key denied the access; carries the region's key.
    ProtectionKey(u16),
    Permission,
}

impl AccessViolation {
    pub const fn si_code(self) -> i32 {
        match self {
            Self::ProtectionKey(_) => SEGV_PKUERR,
            Self::Permission => SEGV_ACCERR,
        }
    }

    pub const fn pkey(self) -> Option<u16> {
        match self {
            Self::ProtectionKey(pkey) => Some(pkey),
            Self::Permission => None,
        }
    }
}

/// Protection-key rights of the current thread (PKRU): two bits per key,
/// access-disable at `2k` and write-disable at `2k + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkeyPolicy {
    enabled: bool,
    pkru: u32,
}

impl PkeyPolicy {
    pub const DISABLED: Self = Self {
        enabled: false,
        pkru: 0,
    };

    pub const fn new(enabled: bool, pkru: u32) -> Self {
        Self { enabled, pkru }
    }

    #[inline]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Keys never restrict instruction fetches.
    pub const fn allows(&self, pkey: u16, write: bool, execute: bool) -> bool {
        if !self.enabled || execute || pkey >= 16 {
            return true;
        }
        let shift = pkey as u32 * 2;
        if self.pkru & (1 << shift) != 0 {
            return false;
        }
        !(write && self.pkru & (1 << (shift + 1)) != 0)
    }
}

/// Check `code` against `vma`. Protection-key denials take precedence over
/// plain permission failures.
pub fn access_error(
    code: PageFaultCode,
    vma: &VmaDesc,
    pkeys: &PkeyPolicy,
) -> Result<(), AccessViolation> {
    let write = code.is_write();
    let exec = code.is_instruction_fetch();

    if code.contains(PageFaultCode::PK) || !pkeys.allows(vma.pkey, write, exec) {
        return Err(if pkeys.enabled() {
            AccessViolation::ProtectionKey(vma.pkey)
        } else {
            AccessViolation::Permission
        });
    }

    if write && !vma.flags.contains(VmaFlags::WRITE) {
        return Err(AccessViolation::Permission);
    }
    if exec && !vma.flags.contains(VmaFlags::EXEC) {
        return Err(AccessViolation::Permission);
    }
    if !vma.flags.is_accessible() {
        return Err(AccessViolation::Permission);
    }
    Ok(())
}
