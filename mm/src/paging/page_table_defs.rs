use crate::paging_defs::PageFlags;
use faultline_abi::addr::{PhysAddr, VirtAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PageTableLevel {
    Five = 5,
    Four = 4,
    Three = 3,
    Two = 2,
    One = 1,
}

impl PageTableLevel {
    #[inline]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::Five => Some(Self::Four),
            Self::Four => Some(Self::Three),
            Self::Three => Some(Self::Two),
            Self::Two => Some(Self::One),
            Self::One => None,
        }
    }

    #[inline]
    pub const fn supports_huge_pages(self) -> bool {
        matches!(self, Self::Three | Self::Two)
    }

    #[inline]
    pub const fn shift(self) -> u32 {
        12 + ((self as u32 - 1) * 9)
    }

    #[inline]
    pub const fn index_of(self, vaddr: VirtAddr) -> usize {
        ((vaddr.as_u64() >> self.shift()) & 0x1FF) as usize
    }

    /// Virtual span covered by one entry at this level.
    #[inline]
    pub const fn entry_size(self) -> u64 {
        1u64 << self.shift()
    }

    #[inline]
    pub const fn align_down(self, vaddr: VirtAddr) -> VirtAddr {
        VirtAddr(vaddr.as_u64() & !(self.entry_size() - 1))
    }
}

impl core::fmt::Display for PageTableLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Five => write!(f, "PML5"),
            Self::Four => write!(f, "PML4"),
            Self::Three => write!(f, "PDPT"),
            Self::Two => write!(f, "PD"),
            Self::One => write!(f, "PT"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn new(addr: PhysAddr, flags: PageFlags) -> Self {
        Self((addr.as_u64() & PageFlags::ADDRESS_MASK) | flags.bits())
    }

    #[inline]
    pub const fn is_present(&self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    #[inline]
    pub const fn is_huge(&self) -> bool {
        self.0 & PageFlags::HUGE.bits() != 0
    }

    #[inline]
    pub const fn is_user(&self) -> bool {
        self.0 & PageFlags::USER.bits() != 0
    }

    #[inline]
    pub const fn is_writable(&self) -> bool {
        self.0 & PageFlags::WRITABLE.bits() != 0
    }

    #[inline]
    pub const fn is_executable(&self) -> bool {
        self.0 & PageFlags::NO_EXECUTE.bits() == 0
    }

    #[inline]
    pub const fn is_unused(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn pkey(&self) -> u16 {
        PageFlags::extract_pkey(self.0)
    }

    #[inline]
    pub const fn address(&self) -> PhysAddr {
        PhysAddr(self.0 & PageFlags::ADDRESS_MASK)
    }

    #[inline]
    pub const fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    #[inline]
    pub fn set(&mut self, addr: PhysAddr, flags: PageFlags) {
        self.0 = (addr.as_u64() & PageFlags::ADDRESS_MASK) | flags.bits();
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PTE({:#x})", self.0)
    }
}

pub const PAGE_TABLE_ENTRIES: usize = 512;

/// A 512-entry page table, aligned to 4KB.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    pub const EMPTY: Self = Self {
        entries: [PageTableEntry::EMPTY; PAGE_TABLE_ENTRIES],
    };

    #[inline]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Pointer to slot `index` of the table at `table`, without creating a
    /// reference to the whole table.
    ///
    /// # Safety
    ///
    /// `table` must point to a live page table and `index` must be below
    /// [`PAGE_TABLE_ENTRIES`].
    #[inline]
    pub unsafe fn entry_ptr(table: *mut Self, index: usize) -> *mut PageTableEntry {
        unsafe { core::ptr::addr_of_mut!((*table).entries).cast::<PageTableEntry>().add(index) }
    }

    /// Single-copy read of one slot; other CPUs may be updating the table.
    ///
    /// # Safety
    ///
    /// Same requirements as [`PageTable::entry_ptr`].
    #[inline]
    pub unsafe fn load_entry(table: *mut Self, index: usize) -> PageTableEntry {
        unsafe { core::ptr::read_volatile(Self::entry_ptr(table, index)) }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_unused())
    }
}

impl core::ops::Index<usize> for PageTable {
    type Output = PageTableEntry;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl core::ops::IndexMut<usize> for PageTable {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::EMPTY
    }
}
