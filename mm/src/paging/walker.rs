use core::sync::atomic::{AtomicU64, Ordering};

use super::page_table_defs::{PageTable, PageTableEntry, PageTableLevel};
use faultline_abi::addr::{PhysAddr, VirtAddr};
use faultline_lib::klog_warn;

use crate::error::{MmError, MmResult};

pub const MAX_PAGING_LEVELS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct WalkResult {
    pub entry: PageTableEntry,
    pub level: PageTableLevel,
    pub phys_addr: PhysAddr,
    pub page_size: u64,
}

impl WalkResult {
    #[inline]
    pub fn is_huge_page(&self) -> bool {
        self.level != PageTableLevel::One
    }
}

/// Turns the physical address of a page table into a pointer the walker can
/// dereference.
///
/// # Safety
///
/// Implementations must only return pointers to live, 4KB-aligned page tables
/// that stay valid for as long as the mapping object is borrowed.
pub unsafe trait PageTableFrameMapping {
    fn phys_to_table_ptr(&self, phys: PhysAddr) -> Option<*mut PageTable>;
}

unsafe impl<T: PageTableFrameMapping + ?Sized> PageTableFrameMapping for &T {
    #[inline]
    fn phys_to_table_ptr(&self, phys: PhysAddr) -> Option<*mut PageTable> {
        (**self).phys_to_table_ptr(phys)
    }
}

/// Tables reached through the higher-half direct map.
pub struct HhdmMapping {
    offset: u64,
}

impl HhdmMapping {
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }
}

unsafe impl PageTableFrameMapping for HhdmMapping {
    #[inline]
    fn phys_to_table_ptr(&self, phys: PhysAddr) -> Option<*mut PageTable> {
        if phys.is_null() || !phys.is_aligned(0x1000) {
            return None;
        }
        Some(self.offset.wrapping_add(phys.as_u64()) as *mut PageTable)
    }
}

// =============================================================================
// Paging modes
// =============================================================================

/// Depth of the translation hierarchy plus the rule deciding which entries
/// terminate a walk early as large pages.
#[derive(Debug, Clone, Copy)]
pub struct PagingMode {
    top: PageTableLevel,
    large_page: fn(PageTableLevel, PageTableEntry) -> bool,
}

fn x86_large_page(level: PageTableLevel, entry: PageTableEntry) -> bool {
    level.supports_huge_pages() && entry.is_huge()
}

impl PagingMode {
    pub const FOUR_LEVEL: Self = Self::new(PageTableLevel::Four, x86_large_page);
    pub const FIVE_LEVEL: Self = Self::new(PageTableLevel::Five, x86_large_page);

    pub const fn new(
        top: PageTableLevel,
        large_page: fn(PageTableLevel, PageTableEntry) -> bool,
    ) -> Self {
        Self { top, large_page }
    }

    #[inline]
    pub const fn top(&self) -> PageTableLevel {
        self.top
    }

    #[inline]
    pub const fn levels(&self) -> usize {
        self.top as usize
    }

    #[inline]
    pub fn is_large(&self, level: PageTableLevel, entry: PageTableEntry) -> bool {
        (self.large_page)(level, entry)
    }
}

// =============================================================================
// Translation chains
// =============================================================================

/// One visited entry: its level, its value, and the table it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub level: PageTableLevel,
    pub entry: PageTableEntry,
    pub table: PhysAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEnd {
    NotPresent,
    LargePage,
    Leaf,
    /// The next table's physical address could not be mapped.
    BadTable(PhysAddr),
}

#[derive(Debug, Clone, Copy)]
pub struct TranslationChain {
    links: [Option<ChainLink>; MAX_PAGING_LEVELS],
    len: usize,
    end: ChainEnd,
}

impl TranslationChain {
    const fn empty() -> Self {
        Self {
            links: [None; MAX_PAGING_LEVELS],
            len: 0,
            end: ChainEnd::NotPresent,
        }
    }

    fn push(&mut self, link: ChainLink) {
        if self.len < MAX_PAGING_LEVELS {
            self.links[self.len] = Some(link);
            self.len += 1;
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &ChainLink> {
        self.links[..self.len].iter().flatten()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn end(&self) -> ChainEnd {
        self.end
    }

    /// Last entry visited.
    pub fn terminal(&self) -> Option<&ChainLink> {
        self.len.checked_sub(1).and_then(|i| self.links[i].as_ref())
    }

    /// Entry that pointed at the table holding [`TranslationChain::terminal`].
    pub fn parent_of_terminal(&self) -> Option<&ChainLink> {
        self.len.checked_sub(2).and_then(|i| self.links[i].as_ref())
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.end, ChainEnd::Leaf | ChainEnd::LargePage)
    }
}

/// Outcome of copying one top-level slot from a reference root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopSync {
    /// The reference slot is empty too; nothing to copy.
    ReferenceEmpty,
    Copied,
    AlreadyPresent,
}

// =============================================================================
// Walker
// =============================================================================

pub struct PageTableWalker<M: PageTableFrameMapping> {
    mapping: M,
    mode: PagingMode,
}

impl<M: PageTableFrameMapping> PageTableWalker<M> {
    #[inline]
    pub const fn new(mapping: M, mode: PagingMode) -> Self {
        Self { mapping, mode }
    }

    #[inline]
    pub fn mode(&self) -> PagingMode {
        self.mode
    }

    #[inline]
    fn table_ptr(&self, phys: PhysAddr) -> MmResult<*mut PageTable> {
        self.mapping
            .phys_to_table_ptr(phys)
            .ok_or(MmError::InvalidPageTable)
    }

    pub fn walk(&self, root: PhysAddr, vaddr: VirtAddr) -> MmResult<WalkResult> {
        let mut table = self.table_ptr(root)?;
        let mut level = self.mode.top;

        loop {
            // SAFETY: `table` comes from the mapping and the index is masked to 9 bits.
            let entry = unsafe { PageTable::load_entry(table, level.index_of(vaddr)) };

            if !entry.is_present() {
                return Err(MmError::NotMapped {
                    address: vaddr.as_u64(),
                    level,
                });
            }

            let next = match level.next_lower() {
                Some(next) if !self.mode.is_large(level, entry) => next,
                _ => {
                    let page_size = level.entry_size();
                    let offset = vaddr.as_u64() & (page_size - 1);
                    return Ok(WalkResult {
                        entry,
                        level,
                        phys_addr: entry.address().offset(offset),
                        page_size,
                    });
                }
            };

            table = self.table_ptr(entry.address())?;
            level = next;
        }
    }

    /// Record every entry on the way to `vaddr`, stopping at the first absent
    /// entry, large page, leaf or unmappable table.
    pub fn walk_chain(&self, root: PhysAddr, vaddr: VirtAddr) -> TranslationChain {
        let mut chain = TranslationChain::empty();
        let mut table_phys = root;
        let mut level = self.mode.top;

        loop {
            let Some(table) = self.mapping.phys_to_table_ptr(table_phys) else {
                chain.end = ChainEnd::BadTable(table_phys);
                return chain;
            };
            // SAFETY: `table` comes from the mapping and the index is masked to 9 bits.
            let entry = unsafe { PageTable::load_entry(table, level.index_of(vaddr)) };
            chain.push(ChainLink {
                level,
                entry,
                table: table_phys,
            });

            if !entry.is_present() {
                chain.end = ChainEnd::NotPresent;
                return chain;
            }
            if self.mode.is_large(level, entry) {
                chain.end = ChainEnd::LargePage;
                return chain;
            }
            match level.next_lower() {
                Some(next) => {
                    table_phys = entry.address();
                    level = next;
                }
                None => {
                    chain.end = ChainEnd::Leaf;
                    return chain;
                }
            }
        }
    }

    pub fn top_entry_ptr(&self, root: PhysAddr, vaddr: VirtAddr) -> MmResult<*mut PageTableEntry> {
        let table = self.table_ptr(root)?;
        // SAFETY: `table` comes from the mapping and the index is masked to 9 bits.
        Ok(unsafe { PageTable::entry_ptr(table, self.mode.top.index_of(vaddr)) })
    }

    /// Copy the top-level slot covering `vaddr` from `reference` into `target`
    /// if the target slot is still empty.
    ///
    /// The store is a single compare-exchange, so concurrent syncs of the same
    /// slot from several CPUs settle on one value.
    pub fn sync_top_entry(
        &self,
        reference: PhysAddr,
        target: PhysAddr,
        vaddr: VirtAddr,
    ) -> MmResult<TopSync> {
        let src = self.top_entry_ptr(reference, vaddr)?;
        let dst = self.top_entry_ptr(target, vaddr)?;
        // SAFETY: both pointers address 8-byte aligned slots of live tables;
        // PageTableEntry is a transparent u64.
        let want = unsafe { core::ptr::read_volatile(src) };
        if !want.is_present() {
            return Ok(TopSync::ReferenceEmpty);
        }
        // SAFETY: `dst` is an aligned slot of a live table, and every other
        // writer of top-level slots also goes through atomic access.
        let slot = unsafe { AtomicU64::from_ptr(dst.cast::<u64>()) };
        match slot.compare_exchange(0, want.as_raw(), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(TopSync::Copied),
            Err(current) => {
                let current = PageTableEntry::from_raw(current);
                if current.address() != want.address() {
                    klog_warn!(
                        "paging: top-level slot for {:#x} diverges from reference ({:?} vs {:?})",
                        vaddr.as_u64(),
                        current,
                        want
                    );
                }
                Ok(TopSync::AlreadyPresent)
            }
        }
    }
}
