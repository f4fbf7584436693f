//! Faults on kernel-half addresses. Nothing here sleeps or takes a lock.

use core::sync::atomic::{AtomicBool, Ordering};

use faultline_abi::addr::VirtAddr;
use faultline_abi::fault::PageFaultCode;
use faultline_abi::signal::SEGV_MAPERR;
use faultline_lib::{klog_debug, klog_warn};

use super::descriptor::FaultContext;
use super::handler::FaultHandler;
use super::outcome::{FaultFailure, FaultOutcome};
use crate::paging::{ChainEnd, PageTableEntry, TopSync};

static PK_IN_KERNEL_WARNED: AtomicBool = AtomicBool::new(false);
static PARENT_PERMS_WARNED: AtomicBool = AtomicBool::new(false);

/// Hardware bits that rule out a stale-TLB explanation: only a write or
/// instruction fetch that hit a present page can be spurious.
const SPURIOUS_WRITE: PageFaultCode = PageFaultCode::WRITE.union(PageFaultCode::PROT);
const SPURIOUS_INSTR: PageFaultCode = PageFaultCode::INSTR.union(PageFaultCode::PROT);

fn spurious_entry_check(code: PageFaultCode, entry: PageTableEntry) -> bool {
    if code.is_write() && !entry.is_writable() {
        return false;
    }
    if code.is_instruction_fetch() && !entry.is_executable() {
        return false;
    }
    true
}

impl FaultHandler<'_> {
    pub(super) fn do_kern_addr_fault(&self, ctx: &mut FaultContext<'_>) -> FaultOutcome {
        match self.kern_addr_fault(ctx) {
            Ok(outcome) => outcome,
            Err(failure) => self.dispatch_failure(ctx, failure),
        }
    }

    fn kern_addr_fault(&self, ctx: &mut FaultContext<'_>) -> Result<FaultOutcome, FaultFailure> {
        if ctx.user_mode() && !ctx.code.is_user() {
            return Err(FaultFailure::ImplicitSupervisor);
        }
        if ctx.code.contains(PageFaultCode::PK) && !PK_IN_KERNEL_WARNED.swap(true, Ordering::Relaxed)
        {
            klog_warn!(
                "page fault: protection key fault on kernel address {:#x}",
                ctx.address.as_u64()
            );
        }

        let lazy_sync_bits = PageFaultCode::RSVD | PageFaultCode::USER | PageFaultCode::PROT;
        if !ctx.code.intersects(lazy_sync_bits)
            && self.config.layout.is_vmalloc_addr(ctx.address.as_u64())
            && self.vmalloc_fault(ctx.address)
        {
            return Ok(FaultOutcome::KernelMappingSynced);
        }

        if self.spurious_kernel_fault(ctx.code, ctx.address) {
            return Ok(FaultOutcome::Spurious);
        }

        if self.hooks.kprobe(ctx.frame) {
            return Ok(FaultOutcome::Hooked);
        }

        Err(FaultFailure::BadArea {
            si_code: SEGV_MAPERR,
            pkey: None,
        })
    }

    /// Copy the reference top-level entry for a vmalloc address into the
    /// loaded root, then check the rest of the walk is there.
    fn vmalloc_fault(&self, address: VirtAddr) -> bool {
        let walker = self.walker();
        let root = self.cpu.current_root();
        let reference = self.registry.reference_root();

        if root != reference {
            match walker.sync_top_entry(reference, root, address) {
                Ok(TopSync::Copied) => {
                    klog_debug!("page fault: synced kernel mapping for {:#x}", address.as_u64())
                }
                Ok(TopSync::AlreadyPresent) => {}
                Ok(TopSync::ReferenceEmpty) | Err(_) => return false,
            }
        }
        walker.walk_chain(root, address).is_mapped()
    }

    /// A protection fault on a kernel address whose reference translation
    /// already grants the access: a stale TLB entry from a lazy flush.
    pub(crate) fn spurious_kernel_fault(&self, code: PageFaultCode, address: VirtAddr) -> bool {
        if code != SPURIOUS_WRITE && code != SPURIOUS_INSTR {
            return false;
        }

        let chain = self
            .walker()
            .walk_chain(self.registry.reference_root(), address);
        let Some(terminal) = chain.terminal().filter(|_| chain.is_mapped()) else {
            return false;
        };
        if !spurious_entry_check(code, terminal.entry) {
            return false;
        }
        if chain.end() == ChainEnd::LargePage {
            return true;
        }

        // The leaf grants the access; the table entry above it must too.
        let parent_ok = chain
            .parent_of_terminal()
            .is_some_and(|parent| spurious_entry_check(code, parent.entry));
        if !parent_ok && !PARENT_PERMS_WARNED.swap(true, Ordering::Relaxed) {
            klog_warn!(
                "page fault: {} has incorrect permission bits for {:#x}",
                chain
                    .parent_of_terminal()
                    .map_or(crate::paging::PageTableLevel::Two, |p| p.level),
                address.as_u64()
            );
        }
        parent_ok
    }
}
