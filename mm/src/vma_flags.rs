//! VMA Flags and Backing Type Definitions
//!
//! Protection bits (0-3) describe what the region currently grants; the
//! `MAY*` mirrors (4-6) bound what `mprotect` may later grant. State bits
//! start at 8.

use bitflags::bitflags;

use crate::paging_defs::PageFlags;

/// Where a region's page contents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VmaBacking {
    /// Zero-filled on demand.
    #[default]
    Anonymous,
    /// Page cache of an inode, starting `pgoff` pages into the file.
    File { inode: u64, pgoff: u64 },
    /// Direct physical mapping; never demand-paged.
    Device { pfn: u64 },
}

impl VmaBacking {
    #[inline]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VmaFlags: u32 {
        const READ       = 1 << 0;
        const WRITE      = 1 << 1;
        const EXEC       = 1 << 2;
        const SHARED     = 1 << 3;

        const MAYREAD    = 1 << 4;
        const MAYWRITE   = 1 << 5;
        const MAYEXEC    = 1 << 6;

        /// Stack-like region that is extended downward on faults just below it.
        const GROWSDOWN  = 1 << 8;
        const LOCKED     = 1 << 9;
        const IO         = 1 << 10;
        const DONTEXPAND = 1 << 11;
        /// Counted against the commit limit.
        const ACCOUNT    = 1 << 12;

        // =====================================================================
        // Convenience combinations
        // =====================================================================

        const USER_DATA = Self::READ.bits() | Self::WRITE.bits()
            | Self::MAYREAD.bits() | Self::MAYWRITE.bits();
        const USER_CODE = Self::READ.bits() | Self::EXEC.bits()
            | Self::MAYREAD.bits() | Self::MAYEXEC.bits();
        const USER_STACK = Self::USER_DATA.bits() | Self::GROWSDOWN.bits() | Self::ACCOUNT.bits();
    }
}

impl VmaFlags {
    /// Any access at all is permitted (not a `PROT_NONE` region).
    #[inline]
    pub const fn is_accessible(self) -> bool {
        self.intersects(Self::READ.union(Self::WRITE).union(Self::EXEC))
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    #[inline]
    pub const fn grows_down(self) -> bool {
        self.contains(Self::GROWSDOWN)
    }

    /// Leaf PTE flags for a user page of a region with these protections.
    ///
    /// Private writable regions are mapped read-only; the first write breaks
    /// the sharing.
    pub const fn to_page_flags(self, pkey: u16) -> PageFlags {
        let mut pf = PageFlags::PRESENT.union(PageFlags::USER);
        if self.contains(Self::WRITE) && self.contains(Self::SHARED) {
            pf = pf.union(PageFlags::WRITABLE);
        }
        if !self.contains(Self::EXEC) {
            pf = pf.union(PageFlags::NO_EXECUTE);
        }
        pf.union(PageFlags::from_pkey(pkey))
    }
}
