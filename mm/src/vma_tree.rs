//! Ordered region collection of one address space.
//!
//! Regions are half-open `[start, end)` intervals keyed by `end`, so the
//! first region whose end lies above an address is a single range query.
//! `start` is atomic because stack growth moves it down while readers of
//! the mmap lock may be looking at the same region; `end` never changes
//! once a region is in the tree.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::ops::Bound::{Excluded, Unbounded};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::address_space::AddressSpace;
use crate::error::{MmError, MmResult};
use crate::paging_defs::PAGE_SIZE_4KB;
use crate::vma_flags::{VmaBacking, VmaFlags};

pub struct Vma {
    start: AtomicU64,
    end: u64,
    pub flags: VmaFlags,
    pub backing: VmaBacking,
    pub pkey: u16,
    /// NUMA policy tag; opaque to the fault path.
    pub policy: Option<u32>,
    owner: Weak<AddressSpace>,
}

/// Snapshot of a region handed to collaborators that may drop the mmap
/// lock, so no region reference outlives the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmaDesc {
    pub start: u64,
    pub end: u64,
    pub flags: VmaFlags,
    pub backing: VmaBacking,
    pub pkey: u16,
    pub policy: Option<u32>,
}

impl VmaDesc {
    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Page offset of `address` into the backing object.
    pub fn pgoff(&self, address: u64) -> u64 {
        let rel = (address.saturating_sub(self.start)) / PAGE_SIZE_4KB;
        match self.backing {
            VmaBacking::File { pgoff, .. } => pgoff + rel,
            VmaBacking::Device { pfn } => pfn + rel,
            VmaBacking::Anonymous => rel,
        }
    }
}

impl Vma {
    pub fn new(
        start: u64,
        end: u64,
        flags: VmaFlags,
        backing: VmaBacking,
        owner: Weak<AddressSpace>,
    ) -> Self {
        Self {
            start: AtomicU64::new(start),
            end,
            flags,
            backing,
            pkey: 0,
            policy: None,
            owner,
        }
    }

    pub fn with_pkey(mut self, pkey: u16) -> Self {
        self.pkey = pkey;
        self
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start() && address < self.end
    }

    /// Owner of the region, if it is still alive.
    pub fn owner(&self) -> Option<Arc<AddressSpace>> {
        self.owner.upgrade()
    }

    /// Move the start of a grows-down region. Callers hold the owner's
    /// `page_table_lock`.
    pub(crate) fn set_start(&self, start: u64) {
        self.start.store(start, Ordering::Release);
    }

    pub fn desc(&self) -> VmaDesc {
        VmaDesc {
            start: self.start(),
            end: self.end,
            flags: self.flags,
            backing: self.backing,
            pkey: self.pkey,
            policy: self.policy,
        }
    }
}

impl core::fmt::Debug for Vma {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vma")
            .field("start", &format_args!("{:#x}", self.start()))
            .field("end", &format_args!("{:#x}", self.end))
            .field("flags", &self.flags)
            .field("pkey", &self.pkey)
            .finish()
    }
}

#[derive(Default)]
pub struct VmaTree {
    by_end: BTreeMap<u64, Arc<Vma>>,
}

impl VmaTree {
    pub const fn new() -> Self {
        Self {
            by_end: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_end.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_end.is_empty()
    }

    /// First region with `end > address`. It may start above `address`.
    pub fn find_vma(&self, address: u64) -> Option<&Arc<Vma>> {
        self.by_end
            .range((Excluded(address), Unbounded))
            .next()
            .map(|(_, vma)| vma)
    }

    /// [`VmaTree::find_vma`] together with the region immediately below it.
    pub fn find_vma_prev(&self, address: u64) -> (Option<&Arc<Vma>>, Option<&Arc<Vma>>) {
        match self.find_vma(address) {
            Some(vma) => (Some(vma), self.prev_of(vma)),
            None => (None, self.by_end.values().next_back()),
        }
    }

    /// Region directly below `vma`.
    pub fn prev_of(&self, vma: &Vma) -> Option<&Arc<Vma>> {
        self.by_end.range(..vma.end()).next_back().map(|(_, v)| v)
    }

    /// Region containing `address`.
    pub fn find_covering(&self, address: u64) -> Option<&Arc<Vma>> {
        self.find_vma(address).filter(|vma| vma.contains(address))
    }

    pub fn insert(&mut self, vma: Vma) -> MmResult<Arc<Vma>> {
        let (start, end) = (vma.start(), vma.end());
        if start >= end {
            return Err(MmError::InvalidRange { start, end });
        }
        if start % PAGE_SIZE_4KB != 0 || end % PAGE_SIZE_4KB != 0 {
            return Err(MmError::NotAligned {
                address: if start % PAGE_SIZE_4KB != 0 { start } else { end },
                required: PAGE_SIZE_4KB,
            });
        }
        if self.find_vma(start).is_some_and(|next| next.start() < end) {
            return Err(MmError::Overlap { start, end });
        }
        let vma = Arc::new(vma);
        self.by_end.insert(end, Arc::clone(&vma));
        Ok(vma)
    }

    /// Remove the region that exactly spans `[start, end)`.
    pub fn remove(&mut self, start: u64, end: u64) -> MmResult<Arc<Vma>> {
        match self.by_end.get(&end) {
            Some(vma) if vma.start() == start => {}
            _ => return Err(MmError::NoVma),
        }
        self.by_end.remove(&end).ok_or(MmError::NoVma)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Vma>> {
        self.by_end.values()
    }

    pub fn clear(&mut self) {
        self.by_end.clear();
    }
}
