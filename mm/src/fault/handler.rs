//! Page fault entry point.

use core::sync::atomic::{AtomicU64, Ordering};

use faultline_abi::addr::VirtAddr;
use faultline_lib::{InterruptFrame, klog_trace};

use super::classify::fault_in_kernel_space;
use super::descriptor::FaultContext;
use super::env::{CpuOps, CurrentTask, FaultHooks, MemoryResolver, OomHandler, SignalSink};
use super::outcome::FaultOutcome;
use crate::config::FaultConfig;
use crate::extable::ExceptionTable;
use crate::paging::{PageTableFrameMapping, PageTableWalker};
use crate::registry::AddressSpaceRegistry;

/// Plain copy of [`FaultStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStatsSnapshot {
    pub total: u64,
    pub minor: u64,
    pub major: u64,
    pub retries: u64,
    pub spurious: u64,
    pub vmalloc_sync: u64,
    pub fixups: u64,
    pub errata: u64,
    pub signals: u64,
    pub oom: u64,
    pub fatal: u64,
}

#[derive(Debug, Default)]
pub struct FaultStats {
    total: AtomicU64,
    minor: AtomicU64,
    major: AtomicU64,
    retries: AtomicU64,
    spurious: AtomicU64,
    vmalloc_sync: AtomicU64,
    fixups: AtomicU64,
    errata: AtomicU64,
    signals: AtomicU64,
    oom: AtomicU64,
    fatal: AtomicU64,
}

impl FaultStats {
    pub const fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            minor: AtomicU64::new(0),
            major: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
            vmalloc_sync: AtomicU64::new(0),
            fixups: AtomicU64::new(0),
            errata: AtomicU64::new(0),
            signals: AtomicU64::new(0),
            oom: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
        }
    }

    pub(crate) fn count_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn account(&self, outcome: &FaultOutcome) {
        let counter = match outcome {
            FaultOutcome::Resolved { major: true } => &self.major,
            FaultOutcome::Resolved { major: false } => &self.minor,
            FaultOutcome::Spurious => &self.spurious,
            FaultOutcome::KernelMappingSynced => &self.vmalloc_sync,
            FaultOutcome::FixedUp { .. } => &self.fixups,
            FaultOutcome::Erratum(_) => &self.errata,
            FaultOutcome::Signaled(_) => &self.signals,
            FaultOutcome::OutOfMemory => &self.oom,
            FaultOutcome::Fatal(_) => &self.fatal,
            FaultOutcome::AsyncPageFault
            | FaultOutcome::Hooked
            | FaultOutcome::Emulated
            | FaultOutcome::Interrupted => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FaultStatsSnapshot {
        FaultStatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            minor: self.minor.load(Ordering::Relaxed),
            major: self.major.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            spurious: self.spurious.load(Ordering::Relaxed),
            vmalloc_sync: self.vmalloc_sync.load(Ordering::Relaxed),
            fixups: self.fixups.load(Ordering::Relaxed),
            errata: self.errata.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            oom: self.oom.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
        }
    }
}

/// Everything one page fault needs, borrowed for the duration of the fault.
///
/// Built per fault by the exception entry; holds no state of its own apart
/// from the shared counters in `stats`.
pub struct FaultHandler<'a> {
    pub config: &'a FaultConfig,
    pub registry: &'a AddressSpaceRegistry,
    /// How paging structures are reached from their physical addresses.
    pub mapping: &'a dyn PageTableFrameMapping,
    pub extable: &'a ExceptionTable,
    pub task: &'a dyn CurrentTask,
    pub cpu: &'a dyn CpuOps,
    pub resolver: &'a dyn MemoryResolver,
    pub signals: &'a dyn SignalSink,
    pub oom: &'a dyn OomHandler,
    pub hooks: &'a dyn FaultHooks,
    pub stats: &'a FaultStats,
}

impl<'a> FaultHandler<'a> {
    #[inline]
    pub(crate) fn walker(&self) -> PageTableWalker<&'a dyn PageTableFrameMapping> {
        PageTableWalker::new(self.mapping, self.config.paging)
    }

    /// Handle one page fault. `frame` is the saved register state (with the
    /// hardware error code) and `address` the faulting linear address.
    ///
    /// Returns with interrupts in the state the exception entry expects:
    /// disabled after a user-address fault, untouched otherwise.
    pub fn handle_page_fault(&self, frame: &mut InterruptFrame, address: VirtAddr) -> FaultOutcome {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let mut ctx = FaultContext::new(frame, address);
        klog_trace!(
            "#PF addr={:#x} code={:#x} rip={:#x}",
            address.as_u64(),
            ctx.code.bits(),
            ctx.rip()
        );

        let outcome = self.dispatch(&mut ctx);
        self.stats.account(&outcome);
        outcome
    }

    fn dispatch(&self, ctx: &mut FaultContext<'_>) -> FaultOutcome {
        if self.hooks.async_page_fault(ctx.frame, ctx.code, ctx.address) {
            return FaultOutcome::AsyncPageFault;
        }
        if self.hooks.mmiotrace(ctx.frame, ctx.address) {
            return FaultOutcome::Hooked;
        }

        if fault_in_kernel_space(&self.config.layout, ctx.address) {
            self.do_kern_addr_fault(ctx)
        } else {
            let outcome = self.do_user_addr_fault(ctx);
            self.cpu.local_irq_disable();
            outcome
        }
    }
}
