//! Process-wide list of address spaces sharing the kernel half.
//!
//! Lock order: the registry lock first, then each address space's
//! `page_table_lock`. Nothing may take them in the other order.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use faultline_abi::addr::{PhysAddr, VirtAddr};
use faultline_lib::klog_debug;
use spin::{Mutex, Once};

use crate::address_space::{AddressSpace, MmUsers};
use crate::error::{MmError, MmResult};
use crate::memory_layout_defs::FaultLayout;
use crate::paging::{PageTableFrameMapping, PageTableWalker, TopSync};

pub struct AddressSpaceRegistry {
    init_mm: Arc<AddressSpace>,
    spaces: Mutex<Vec<Weak<AddressSpace>>>,
}

impl AddressSpaceRegistry {
    pub fn new(kernel_root: PhysAddr) -> Self {
        Self {
            init_mm: AddressSpace::new_kernel(kernel_root),
            spaces: Mutex::new(Vec::new()),
        }
    }

    /// The kernel address space.
    #[inline]
    pub fn init_mm(&self) -> &Arc<AddressSpace> {
        &self.init_mm
    }

    /// Translation root every kernel-half mapping is copied from.
    #[inline]
    pub fn reference_root(&self) -> PhysAddr {
        self.init_mm.root()
    }

    pub fn register(&self, mm: &Arc<AddressSpace>) {
        let mut spaces = self.spaces.lock();
        spaces.retain(|w| w.strong_count() > 0);
        if !spaces.iter().any(|w| w.as_ptr() == Arc::as_ptr(mm)) {
            spaces.push(Arc::downgrade(mm));
        }
    }

    pub fn unregister(&self, mm: &AddressSpace) {
        let target: *const AddressSpace = mm;
        self.spaces
            .lock()
            .retain(|w| w.strong_count() > 0 && w.as_ptr() != target);
    }

    /// Create and register a user address space.
    pub fn create(&self, root: PhysAddr) -> MmUsers {
        let mm = AddressSpace::new(root);
        self.register(mm.arc());
        mm
    }

    /// Live registered address spaces.
    pub fn len(&self) -> usize {
        self.spaces
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the reference top-level entries covering `[start, end)` into
    /// every registered address space whose slot is still empty.
    ///
    /// Returns the number of slots written.
    pub fn sync_kernel_mappings<M: PageTableFrameMapping>(
        &self,
        walker: &PageTableWalker<M>,
        layout: &FaultLayout,
        start: u64,
        end: u64,
    ) -> MmResult<usize> {
        if start >= end || start < layout.task_size_max {
            return Err(MmError::InvalidRange { start, end });
        }
        let top = walker.mode().top();
        let step = top.entry_size();
        let reference = self.reference_root();

        let spaces = self.spaces.lock();
        let mut copied = 0usize;
        let mut addr = top.align_down(VirtAddr::new(start)).as_u64();
        while addr < end {
            for mm in spaces.iter().filter_map(Weak::upgrade) {
                let _pt = mm.page_table_lock.lock();
                if walker.sync_top_entry(reference, mm.root(), VirtAddr::new(addr))?
                    == TopSync::Copied
                {
                    copied += 1;
                }
            }
            match addr.checked_add(step) {
                Some(next) => addr = next,
                None => break,
            }
        }
        klog_debug!(
            "registry: synced [{:#x}, {:#x}) into {} slots",
            start,
            end,
            copied
        );
        Ok(copied)
    }
}

static REGISTRY: Once<AddressSpaceRegistry> = Once::new();

/// Install the global registry. Later calls return the first instance.
pub fn registry_init(kernel_root: PhysAddr) -> &'static AddressSpaceRegistry {
    REGISTRY.call_once(|| AddressSpaceRegistry::new(kernel_root))
}

pub fn registry() -> Option<&'static AddressSpaceRegistry> {
    REGISTRY.get()
}
