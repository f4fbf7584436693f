//! Per-process address space: translation root, region tree and the locks
//! guarding them.
//!
//! Lock order inside one address space: `mmap` (read or write), then
//! `page_table_lock`. The registry lock, when needed, comes before both.

use alloc::sync::Arc;
use core::ops::Deref;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use faultline_abi::addr::PhysAddr;
use faultline_lib::klog_debug;
use spin::{Mutex, RwLock, RwLockReadGuard};

use crate::config::StackLimits;
use crate::error::{MmError, MmResult};
use crate::paging_defs::PAGE_SIZE_4KB;
use crate::vma_flags::{VmaBacking, VmaFlags};
use crate::vma_tree::{Vma, VmaTree};

static NEXT_MM_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpaceKind {
    Kernel,
    User,
}

/// Snapshot of the accounting counters. Sizes are in pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MmCounters {
    pub map_count: u64,
    pub total_vm: u64,
    pub stack_vm: u64,
    pub hiwater_vm: u64,
    pub min_flt: u64,
    pub maj_flt: u64,
}

pub struct AddressSpace {
    id: u32,
    root: PhysAddr,
    kind: AddressSpaceKind,
    mmap: RwLock<VmaTree>,
    /// Serializes translation-root edits and stack growth.
    pub page_table_lock: Mutex<()>,
    users: AtomicU32,
    map_count: AtomicU64,
    total_vm: AtomicU64,
    stack_vm: AtomicU64,
    hiwater_vm: AtomicU64,
    min_flt: AtomicU64,
    maj_flt: AtomicU64,
}

impl AddressSpace {
    fn build(root: PhysAddr, kind: AddressSpaceKind) -> Self {
        Self {
            id: NEXT_MM_ID.fetch_add(1, Ordering::Relaxed),
            root,
            kind,
            mmap: RwLock::new(VmaTree::new()),
            page_table_lock: Mutex::new(()),
            users: AtomicU32::new(1),
            map_count: AtomicU64::new(0),
            total_vm: AtomicU64::new(0),
            stack_vm: AtomicU64::new(0),
            hiwater_vm: AtomicU64::new(0),
            min_flt: AtomicU64::new(0),
            maj_flt: AtomicU64::new(0),
        }
    }

    /// Fresh user address space with one active user.
    pub fn new(root: PhysAddr) -> MmUsers {
        MmUsers(Arc::new(Self::build(root, AddressSpaceKind::User)))
    }

    /// The kernel's reference address space. Its user count is never dropped.
    pub fn new_kernel(root: PhysAddr) -> Arc<Self> {
        Arc::new(Self::build(root, AddressSpaceKind::Kernel))
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    #[inline]
    pub fn kind(&self) -> AddressSpaceKind {
        self.kind
    }

    #[inline]
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Acquire)
    }

    /// Take another active-user reference.
    pub fn mmget(self: &Arc<Self>) -> MmUsers {
        self.users.fetch_add(1, Ordering::AcqRel);
        MmUsers(Arc::clone(self))
    }

    /// Like [`AddressSpace::mmget`], but fails once the space has been torn down.
    pub fn mmget_not_zero(self: &Arc<Self>) -> Option<MmUsers> {
        let mut cur = self.users.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return None;
            }
            match self.users.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(MmUsers(Arc::clone(self))),
                Err(actual) => cur = actual,
            }
        }
    }

    fn mmput(&self) {
        if self.users.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.exit_mmap();
        }
    }

    fn exit_mmap(&self) {
        let mut tree = self.mmap.write();
        let regions = tree.len();
        tree.clear();
        self.map_count.store(0, Ordering::Relaxed);
        self.total_vm.store(0, Ordering::Relaxed);
        self.stack_vm.store(0, Ordering::Relaxed);
        klog_debug!("mm {}: torn down, {} regions released", self.id, regions);
    }

    // =========================================================================
    // Region management
    // =========================================================================

    pub fn map_region(
        self: &Arc<Self>,
        start: u64,
        end: u64,
        flags: VmaFlags,
        backing: VmaBacking,
        pkey: u16,
    ) -> MmResult<Arc<Vma>> {
        let mut tree = self.mmap.write();
        if self.users() == 0 {
            return Err(MmError::AddressSpaceDead);
        }
        let vma = Vma::new(start, end, flags, backing, Arc::downgrade(self)).with_pkey(pkey);
        let vma = tree.insert(vma)?;
        let pages = (end - start) / PAGE_SIZE_4KB;
        self.map_count.fetch_add(1, Ordering::Relaxed);
        self.account_growth(pages, flags.grows_down());
        Ok(vma)
    }

    pub fn unmap_region(&self, start: u64, end: u64) -> MmResult {
        let mut tree = self.mmap.write();
        let vma = tree.remove(start, end)?;
        let pages = vma.len() / PAGE_SIZE_4KB;
        self.map_count.fetch_sub(1, Ordering::Relaxed);
        self.total_vm.fetch_sub(pages, Ordering::Relaxed);
        if vma.flags.grows_down() {
            self.stack_vm.fetch_sub(pages, Ordering::Relaxed);
        }
        Ok(())
    }

    fn account_growth(&self, pages: u64, stack: bool) {
        let total = self.total_vm.fetch_add(pages, Ordering::Relaxed) + pages;
        self.hiwater_vm.fetch_max(total, Ordering::Relaxed);
        if stack {
            self.stack_vm.fetch_add(pages, Ordering::Relaxed);
        }
    }

    // =========================================================================
    // mmap lock
    // =========================================================================

    pub fn mmap_read(&self) -> MmapReadGuard<'_> {
        MmapReadGuard {
            mm: self,
            guard: Some(self.mmap.read()),
        }
    }

    pub fn mmap_try_read(&self) -> Option<MmapReadGuard<'_>> {
        self.mmap.try_read().map(|guard| MmapReadGuard {
            mm: self,
            guard: Some(guard),
        })
    }

    /// Exclusive access to the region tree.
    pub fn mmap_write(&self) -> spin::RwLockWriteGuard<'_, VmaTree> {
        self.mmap.write()
    }

    // =========================================================================
    // Stack growth
    // =========================================================================

    /// Extend the grows-down region `vma` so that it covers `address`.
    ///
    /// Runs with the mmap lock held for reading; `tree` is the tree that lock
    /// protects. Growth itself is serialized by `page_table_lock`, and a
    /// region already grown past `address` by another CPU is left alone.
    pub fn expand_stack(
        &self,
        tree: &VmaTree,
        vma: &Vma,
        address: u64,
        limits: &StackLimits,
    ) -> MmResult {
        let address = address & !(PAGE_SIZE_4KB - 1);
        if address < limits.mmap_min_addr {
            return Err(MmError::BelowMmapMin { address });
        }
        if !vma.flags.grows_down() {
            return Err(MmError::NotGrowable);
        }

        let _pt = self.page_table_lock.lock();
        let start = vma.start();
        if address >= start {
            return Ok(());
        }

        if let Some(prev) = tree.prev_of(vma)
            && prev.flags.is_accessible()
            && !prev.flags.grows_down()
            && address.saturating_sub(prev.end()) < limits.guard_gap
        {
            return Err(MmError::StackGuardGap { address });
        }

        let size = vma.end() - address;
        if size > limits.rlimit {
            return Err(MmError::StackLimit {
                requested: size,
                limit: limits.rlimit,
            });
        }

        let grow = (start - address) / PAGE_SIZE_4KB;
        vma.set_start(address);
        self.account_growth(grow, true);
        klog_debug!(
            "mm {}: stack grown to {:#x} (+{} pages)",
            self.id,
            address,
            grow
        );
        Ok(())
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    pub fn count_fault(&self, major: bool) {
        if major {
            self.maj_flt.fetch_add(1, Ordering::Relaxed);
        } else {
            self.min_flt.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> MmCounters {
        MmCounters {
            map_count: self.map_count.load(Ordering::Relaxed),
            total_vm: self.total_vm.load(Ordering::Relaxed),
            stack_vm: self.stack_vm.load(Ordering::Relaxed),
            hiwater_vm: self.hiwater_vm.load(Ordering::Relaxed),
            min_flt: self.min_flt.load(Ordering::Relaxed),
            maj_flt: self.maj_flt.load(Ordering::Relaxed),
        }
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("kind", &self.kind)
            .field("users", &self.users())
            .finish()
    }
}

/// Active-user reference; dropping the last one tears the regions down.
pub struct MmUsers(Arc<AddressSpace>);

impl MmUsers {
    /// Structural reference that does not keep the regions alive.
    pub fn arc(&self) -> &Arc<AddressSpace> {
        &self.0
    }
}

impl Deref for MmUsers {
    type Target = Arc<AddressSpace>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Clone for MmUsers {
    fn clone(&self) -> Self {
        self.0.mmget()
    }
}

impl Drop for MmUsers {
    fn drop(&mut self) {
        self.0.mmput();
    }
}

impl core::fmt::Debug for MmUsers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared hold on the mmap lock that a memory resolver may release and
/// reacquire while servicing a fault.
pub struct MmapReadGuard<'a> {
    mm: &'a AddressSpace,
    guard: Option<RwLockReadGuard<'a, VmaTree>>,
}

impl<'a> MmapReadGuard<'a> {
    #[inline]
    pub fn mm(&self) -> &'a AddressSpace {
        self.mm
    }

    /// The region tree, or `None` after [`MmapReadGuard::unlock`].
    #[inline]
    pub fn tree(&self) -> Option<&VmaTree> {
        self.guard.as_deref()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    pub fn unlock(&mut self) {
        self.guard = None;
    }

    /// Blocking reacquire; a no-op while still held.
    pub fn relock(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.mm.mmap.read());
        }
    }
}
