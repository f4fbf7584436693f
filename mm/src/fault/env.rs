//! Collaborators the fault path calls out to.
//!
//! The pipeline decides *what* happens to a fault; these traits carry it
//! out. Memory resolution and signal delivery are black boxes here.

use core::ops::Range;

use faultline_abi::addr::{PhysAddr, VirtAddr};
use faultline_abi::fault::PageFaultCode;
use faultline_abi::signal::FaultSigInfo;
use faultline_lib::{DescriptorTables, InterruptFrame};

use crate::address_space::{AddressSpace, MmapReadGuard};
use crate::fault::outcome::{FaultFlags, VmFaultFlags};
use crate::vma_tree::VmaDesc;

/// Populates or repairs the translation for one faulting address.
pub trait MemoryResolver {
    /// Resolve a fault inside `vma` with the mmap lock held through `lock`.
    ///
    /// An implementation returning [`VmFaultFlags::RETRY`] must have released
    /// the lock (`lock.unlock()`); the caller reacquires it before retrying.
    fn handle_mm_fault(
        &self,
        mm: &AddressSpace,
        vma: &VmaDesc,
        address: VirtAddr,
        flags: FaultFlags,
        lock: &mut MmapReadGuard<'_>,
    ) -> VmFaultFlags;
}

pub trait SignalSink {
    /// Queue a synchronous fault signal for the current task.
    fn force_sig_fault(&self, info: &FaultSigInfo);
}

pub trait OomHandler {
    /// A user fault could not get memory; pick a victim or wait.
    fn pagefault_out_of_memory(&self);
}

/// What the task records about its last hardware fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFaultInfo {
    pub trap_nr: u8,
    pub error_code: PageFaultCode,
    pub address: VirtAddr,
}

/// The task running on this CPU when the fault was raised.
pub trait CurrentTask {
    /// Address space, or `None` for kernel threads.
    fn mm(&self) -> Option<&AddressSpace>;
    /// Page faults must not sleep or resolve (`pagefault_disable()` or atomic
    /// context).
    fn faulthandler_disabled(&self) -> bool;
    fn in_interrupt(&self) -> bool;
    fn signal_pending(&self) -> bool;
    fn fatal_signal_pending(&self) -> bool;
    /// The task asked to get a signal even when a user access fault is
    /// fixed up by the exception table.
    fn sig_on_uaccess_err(&self) -> bool {
        false
    }
    fn set_fault_info(&self, info: TaskFaultInfo);
    /// Bounds of the kernel stack, `[bottom, top)`.
    fn kernel_stack(&self) -> Option<Range<u64>> {
        None
    }
    fn stack_end_corrupted(&self) -> bool {
        false
    }
    fn pid(&self) -> u32;
    fn comm(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub smap: bool,
    pub smep: bool,
    /// Protection keys enabled by the OS (`CR4.PKE`).
    pub ospke: bool,
}

/// Per-CPU operations the fault path needs.
pub trait CpuOps {
    fn local_irq_enable(&self);
    fn local_irq_disable(&self);
    /// Translation root currently loaded.
    fn current_root(&self) -> PhysAddr;
    /// Read one byte without faulting; `user` restricts the read to
    /// user-accessible mappings.
    fn read_byte_nofault(&self, address: u64, user: bool) -> Option<u8>;
    fn descriptor_tables(&self) -> Option<DescriptorTables> {
        None
    }
    fn features(&self) -> CpuFeatures;
    fn pkru(&self) -> u32 {
        0
    }
    /// Terminal kernel error. Real implementations do not return.
    fn die(&self, reason: &str, frame: &InterruptFrame, code: PageFaultCode);
}

/// Optional interception points. Each returns `true` when it consumed the
/// fault.
pub trait FaultHooks {
    /// Paravirtualized "page not yet present" notification.
    fn async_page_fault(
        &self,
        _frame: &InterruptFrame,
        _code: PageFaultCode,
        _address: VirtAddr,
    ) -> bool {
        false
    }

    /// MMIO access tracer armed on this address.
    fn mmiotrace(&self, _frame: &InterruptFrame, _address: VirtAddr) -> bool {
        false
    }

    /// A kprobe single-stepping the faulting instruction.
    fn kprobe(&self, _frame: &InterruptFrame) -> bool {
        false
    }

    /// Emulate an access to the legacy vsyscall page.
    fn emulate_vsyscall(
        &self,
        _frame: &mut InterruptFrame,
        _code: PageFaultCode,
        _address: VirtAddr,
    ) -> bool {
        false
    }
}

/// No hooks installed.
pub struct NoHooks;

impl FaultHooks for NoHooks {}
