//! Memory layout constants for x86_64.
//!
//! This module defines the virtual address space boundaries the fault path
//! classifies against: the top of user space, the legacy vsyscall page, the
//! lazily synchronized vmalloc area, and the kernel image and module areas.

use crate::paging_defs::PAGE_SIZE_4KB;

// =============================================================================
// User Virtual Address Space
// =============================================================================

/// Highest user address plus one, minus a guard page (4-level paging).
///
/// The last page below the canonical hole is never mapped so that a
/// `syscall` returning to a non-canonical rip cannot be set up from user space.
pub const TASK_SIZE_MAX: u64 = (1 << 47) - PAGE_SIZE_4KB;

/// Same boundary with 57-bit linear addresses.
pub const TASK_SIZE_MAX_LA57: u64 = (1 << 56) - PAGE_SIZE_4KB;

/// Default lowest address user mappings (and stack growth) may reach.
pub const DEFAULT_MMAP_MIN_ADDR: u64 = 0x1_0000;

// =============================================================================
// Kernel Virtual Address Space
// =============================================================================

/// Higher Half Direct Map base address.
pub const HHDM_VIRT_BASE: u64 = 0xFFFF_8880_0000_0000;

/// Lazily synchronized kernel mapping area (vmalloc / ioremap).
pub const VMALLOC_START: u64 = 0xFFFF_C900_0000_0000;
pub const VMALLOC_END: u64 = 0xFFFF_E900_0000_0000;

pub const VMALLOC_START_LA57: u64 = 0xFFA0_0000_0000_0000;
pub const VMALLOC_END_LA57: u64 = 0xFFD2_0000_0000_0000;

/// Kernel image mapping (`__START_KERNEL_map`), 1 GB.
pub const KERNEL_VIRTUAL_BASE: u64 = 0xFFFF_FFFF_8000_0000;
pub const KERNEL_IMAGE_END: u64 = 0xFFFF_FFFF_C000_0000;

/// Loadable module area.
pub const MODULES_VADDR: u64 = KERNEL_IMAGE_END;
pub const MODULES_END: u64 = 0xFFFF_FFFF_FF00_0000;

/// Legacy fixed-address vsyscall page.
pub const VSYSCALL_ADDR: u64 = 0xFFFF_FFFF_FF60_0000;

// =============================================================================
// Fault Layout
// =============================================================================

/// Address boundaries consulted while classifying and resolving a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultLayout {
    pub task_size_max: u64,
    pub vsyscall_addr: u64,
    pub vmalloc_start: u64,
    pub vmalloc_end: u64,
    pub kernel_text_start: u64,
    pub kernel_text_end: u64,
    pub modules_start: u64,
    pub modules_end: u64,
}

impl FaultLayout {
    #[inline]
    pub const fn is_vmalloc_addr(&self, address: u64) -> bool {
        address >= self.vmalloc_start && address < self.vmalloc_end
    }

    #[inline]
    pub const fn is_kernel_text(&self, address: u64) -> bool {
        address >= self.kernel_text_start && address < self.kernel_text_end
    }

    #[inline]
    pub const fn is_module_addr(&self, address: u64) -> bool {
        address >= self.modules_start && address < self.modules_end
    }
}

pub const DEFAULT_FAULT_LAYOUT: FaultLayout = FaultLayout {
    task_size_max: TASK_SIZE_MAX,
    vsyscall_addr: VSYSCALL_ADDR,
    vmalloc_start: VMALLOC_START,
    vmalloc_end: VMALLOC_END,
    kernel_text_start: KERNEL_VIRTUAL_BASE,
    kernel_text_end: KERNEL_IMAGE_END,
    modules_start: MODULES_VADDR,
    modules_end: MODULES_END,
};

pub const LA57_FAULT_LAYOUT: FaultLayout = FaultLayout {
    task_size_max: TASK_SIZE_MAX_LA57,
    vmalloc_start: VMALLOC_START_LA57,
    vmalloc_end: VMALLOC_END_LA57,
    ..DEFAULT_FAULT_LAYOUT
};
