//! Fault results and the dispatcher that turns unresolvable faults into
//! signals, fixups or a fatal kernel error.

use bitflags::bitflags;
use faultline_abi::addr::VirtAddr;
use faultline_abi::fault::{PageFaultCode, TRAP_PAGE_FAULT};
use faultline_abi::signal::{
    BUS_ADRERR, BUS_MCEERR_AR, FaultSigInfo, ILL_ILLOPN, SEGV_MAPERR, SEGV_PKUERR, SIGBUS,
    SIGILL, SIGSEGV,
};
use faultline_abi::PAGE_SHIFT;
use faultline_lib::{klog_error, klog_warn};

use super::descriptor::FaultContext;
use super::env::TaskFaultInfo;
use super::erratum::{self, Erratum};
use super::handler::FaultHandler;
use super::oops;
use crate::paging_defs::PAGE_SIZE_4KB;

bitflags! {
    /// What a memory resolver reports back.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct VmFaultFlags: u32 {
        const OOM            = 0x0001;
        const SIGBUS         = 0x0002;
        /// Resolved, but I/O was needed.
        const MAJOR          = 0x0004;
        const WRITE          = 0x0008;
        /// Hit a hardware-poisoned page.
        const HWPOISON       = 0x0010;
        /// Hit a poisoned huge page; size index in bits 16..19.
        const HWPOISON_LARGE = 0x0020;
        const SIGSEGV        = 0x0040;
        const NOPAGE         = 0x0100;
        const LOCKED         = 0x0200;
        /// Lock dropped; try again.
        const RETRY          = 0x0400;
        const FALLBACK       = 0x0800;
        const DONE_COW       = 0x1000;
        const NEEDDSYNC      = 0x2000;

        const ERROR = Self::OOM.bits() | Self::SIGBUS.bits() | Self::SIGSEGV.bits()
            | Self::HWPOISON.bits() | Self::HWPOISON_LARGE.bits() | Self::FALLBACK.bits();
    }
}

impl VmFaultFlags {
    const HINDEX_SHIFT: u32 = 16;
    const HINDEX_MASK: u32 = 0xf;

    /// `HWPOISON_LARGE` carrying the huge page size index.
    pub const fn hwpoison_large(hindex: u32) -> Self {
        Self::from_bits_retain(
            Self::HWPOISON_LARGE.bits() | ((hindex & Self::HINDEX_MASK) << Self::HINDEX_SHIFT),
        )
    }

    #[inline]
    pub const fn hwpoison_hindex(self) -> usize {
        ((self.bits() >> Self::HINDEX_SHIFT) & Self::HINDEX_MASK) as usize
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.intersects(Self::ERROR)
    }
}

bitflags! {
    /// Context passed down to the memory resolver.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FaultFlags: u32 {
        const WRITE         = 0x001;
        const MKWRITE       = 0x002;
        const ALLOW_RETRY   = 0x004;
        const RETRY_NOWAIT  = 0x008;
        const KILLABLE      = 0x010;
        /// A previous attempt returned `RETRY`.
        const TRIED         = 0x020;
        const USER          = 0x040;
        const REMOTE        = 0x080;
        const INSTRUCTION   = 0x100;
        const INTERRUPTIBLE = 0x200;

        const DEFAULT = Self::ALLOW_RETRY.bits() | Self::KILLABLE.bits()
            | Self::INTERRUPTIBLE.bits();
    }
}

/// Why a resolver step gave up. Consumed by [`FaultHandler::dispatch_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultFailure {
    /// No usable region, or the region forbids the access.
    BadArea { si_code: i32, pkey: Option<u16> },
    /// The memory resolver reported an error.
    VmFault(VmFaultFlags),
    /// A retry was abandoned because a signal is pending.
    SignalPending,
    /// Reserved bit set in a paging structure.
    PageTableCorrupt,
    /// Supervisor-mode access from user code; nothing may recover it.
    ImplicitSupervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalFault {
    KernelOops,
    CorruptPageTable,
    KernelStackOverflow,
    /// The resolver returned something the pipeline has no rule for.
    UnexpectedResult(VmFaultFlags),
}

/// How one fault ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved { major: bool },
    Spurious,
    KernelMappingSynced,
    AsyncPageFault,
    Hooked,
    Emulated,
    Erratum(Erratum),
    FixedUp { resume_at: u64, signaled: bool },
    Signaled(FaultSigInfo),
    OutOfMemory,
    /// Gave up because a signal is pending; it is delivered on return.
    Interrupted,
    Fatal(FatalFault),
}

impl FaultHandler<'_> {
    pub(crate) fn dispatch_failure(
        &self,
        ctx: &mut FaultContext<'_>,
        failure: FaultFailure,
    ) -> FaultOutcome {
        match failure {
            FaultFailure::BadArea { si_code, pkey } => {
                self.bad_area_nosemaphore(ctx, si_code, pkey)
            }
            FaultFailure::VmFault(fault) => self.mm_fault_error(ctx, fault),
            FaultFailure::SignalPending if ctx.user_mode() => FaultOutcome::Interrupted,
            FaultFailure::SignalPending => self.no_context(ctx, SIGBUS, BUS_ADRERR),
            FaultFailure::PageTableCorrupt => {
                oops::pgtable_bad(self.cpu, &self.walker(), self.task, ctx);
                FaultOutcome::Fatal(FatalFault::CorruptPageTable)
            }
            FaultFailure::ImplicitSupervisor => self.page_fault_oops(ctx),
        }
    }

    /// Route a resolver error to the matching response.
    pub(crate) fn mm_fault_error(
        &self,
        ctx: &mut FaultContext<'_>,
        fault: VmFaultFlags,
    ) -> FaultOutcome {
        if self.task.fatal_signal_pending() && !ctx.code.is_user() {
            return self.no_context(ctx, 0, 0);
        }

        if fault.contains(VmFaultFlags::OOM) {
            if !ctx.code.is_user() {
                return self.no_context(ctx, SIGSEGV, SEGV_MAPERR);
            }
            self.oom.pagefault_out_of_memory();
            return FaultOutcome::OutOfMemory;
        }

        if fault.intersects(
            VmFaultFlags::SIGBUS | VmFaultFlags::HWPOISON | VmFaultFlags::HWPOISON_LARGE,
        ) {
            return self.do_sigbus(ctx, fault);
        }

        if fault.contains(VmFaultFlags::SIGSEGV) {
            return self.bad_area_nosemaphore(ctx, SEGV_MAPERR, None);
        }

        klog_error!(
            "BUG: unexpected resolver result {:?} at {:#x}",
            fault,
            ctx.address.as_u64()
        );
        oops::show_fault_oops(self.cpu, &self.walker(), self.task, ctx);
        self.cpu.die("BUG", ctx.frame, ctx.code);
        FaultOutcome::Fatal(FatalFault::UnexpectedResult(fault))
    }

    fn do_sigbus(&self, ctx: &mut FaultContext<'_>, fault: VmFaultFlags) -> FaultOutcome {
        if !ctx.code.is_user() {
            return self.no_context(ctx, SIGBUS, BUS_ADRERR);
        }
        if erratum::is_prefetch(self.cpu, &self.config.layout, ctx.frame, ctx.code) {
            return FaultOutcome::Erratum(Erratum::Prefetch);
        }

        self.set_signal_archinfo(ctx);

        let info = if fault.intersects(VmFaultFlags::HWPOISON | VmFaultFlags::HWPOISON_LARGE) {
            klog_error!(
                "MCE: killing {}:{} due to hardware memory corruption fault at {:#x}",
                self.task.comm(),
                self.task.pid(),
                ctx.address.as_u64()
            );
            let lsb = if fault.contains(VmFaultFlags::HWPOISON) {
                PAGE_SHIFT
            } else {
                self.config.huge_page_shift(fault.hwpoison_hindex())
            };
            FaultSigInfo::new(SIGBUS, BUS_MCEERR_AR, ctx.address).with_addr_lsb(lsb)
        } else {
            FaultSigInfo::new(SIGBUS, BUS_ADRERR, ctx.address)
        };
        self.signals.force_sig_fault(&info);
        FaultOutcome::Signaled(info)
    }

    /// Bad access with the mmap lock already dropped (or never taken).
    pub(crate) fn bad_area_nosemaphore(
        &self,
        ctx: &mut FaultContext<'_>,
        si_code: i32,
        pkey: Option<u16>,
    ) -> FaultOutcome {
        if ctx.user_mode() && ctx.code.is_user() {
            self.cpu.local_irq_enable();
            let outcome = self.user_bad_area(ctx, si_code, pkey);
            self.cpu.local_irq_disable();
            return outcome;
        }

        if erratum::is_f00f_bug(&self.config.quirks, ctx.code, ctx.address) {
            let info = FaultSigInfo::new(SIGILL, ILL_ILLOPN, VirtAddr::new(ctx.rip()));
            self.signals.force_sig_fault(&info);
            return FaultOutcome::Erratum(Erratum::F00f);
        }

        self.no_context(ctx, SIGSEGV, si_code)
    }

    fn user_bad_area(
        &self,
        ctx: &mut FaultContext<'_>,
        si_code: i32,
        pkey: Option<u16>,
    ) -> FaultOutcome {
        if erratum::is_prefetch(self.cpu, &self.config.layout, ctx.frame, ctx.code) {
            return FaultOutcome::Erratum(Erratum::Prefetch);
        }
        if erratum::is_errata100(&self.config.quirks, ctx.frame, ctx.address) {
            return FaultOutcome::Erratum(Erratum::Amd100);
        }

        // Do not leak the kernel page table layout through the error code.
        if ctx.address.as_u64() >= self.config.layout.task_size_max {
            ctx.code |= PageFaultCode::PROT;
        }

        if self.config.show_unhandled_signals {
            oops::show_signal_msg(self.cpu, self.task, ctx, SIGSEGV);
        }

        self.set_signal_archinfo(ctx);

        let mut info = FaultSigInfo::new(SIGSEGV, si_code, ctx.address);
        if si_code == SEGV_PKUERR
            && let Some(pkey) = pkey
        {
            info = info.with_pkey(pkey);
        }
        self.signals.force_sig_fault(&info);
        FaultOutcome::Signaled(info)
    }

    /// Kernel-mode fault nothing else claimed: fixup, stack overflow,
    /// errata, or oops. `signo == 0` means no signal on fixup.
    pub(crate) fn no_context(
        &self,
        ctx: &mut FaultContext<'_>,
        signo: u8,
        si_code: i32,
    ) -> FaultOutcome {
        if ctx.user_mode() {
            return self.page_fault_oops(ctx);
        }

        if let Some(resume_at) = self.extable.fixup_exception(ctx.frame) {
            if self.task.in_interrupt() {
                return FaultOutcome::FixedUp {
                    resume_at,
                    signaled: false,
                };
            }
            let mut signaled = false;
            if self.task.sig_on_uaccess_err() && signo != 0 {
                self.set_signal_archinfo(ctx);
                self.signals
                    .force_sig_fault(&FaultSigInfo::new(signo, si_code, ctx.address));
                signaled = true;
            }
            return FaultOutcome::FixedUp {
                resume_at,
                signaled,
            };
        }

        if self.hit_kernel_stack_guard(ctx.address) {
            klog_error!(
                "BUG: stack guard page was hit at {:#x} (task {}:{})",
                ctx.address.as_u64(),
                self.task.comm(),
                self.task.pid()
            );
            self.cpu.die("kernel stack overflow (page fault)", ctx.frame, ctx.code);
            return FaultOutcome::Fatal(FatalFault::KernelStackOverflow);
        }

        if erratum::is_prefetch(self.cpu, &self.config.layout, ctx.frame, ctx.code) {
            return FaultOutcome::Erratum(Erratum::Prefetch);
        }
        if erratum::is_errata93(&self.config.quirks, &self.config.layout, ctx.frame, ctx.address)
        {
            return FaultOutcome::Erratum(Erratum::Amd93);
        }

        self.page_fault_oops(ctx)
    }

    /// A fault within one page below or above the kernel stack of a task
    /// whose stack lives in the vmalloc area.
    fn hit_kernel_stack_guard(&self, address: VirtAddr) -> bool {
        let address = address.as_u64();
        if !self.config.layout.is_vmalloc_addr(address) {
            return false;
        }
        let Some(stack) = self.task.kernel_stack() else {
            return false;
        };
        stack.start.wrapping_sub(1).wrapping_sub(address) < PAGE_SIZE_4KB
            || address.wrapping_sub(stack.end) < PAGE_SIZE_4KB
    }

    pub(crate) fn page_fault_oops(&self, ctx: &mut FaultContext<'_>) -> FaultOutcome {
        oops::show_fault_oops(self.cpu, &self.walker(), self.task, ctx);
        if self.task.stack_end_corrupted() {
            klog_warn!("Thread overran stack, or stack corrupted");
        }
        self.cpu.die("Oops", ctx.frame, ctx.code);
        FaultOutcome::Fatal(FatalFault::KernelOops)
    }

    /// Record the fault on the task the way user space will see it.
    pub(crate) fn set_signal_archinfo(&self, ctx: &FaultContext<'_>) {
        let mut code = ctx.code;
        if ctx.address.as_u64() >= self.config.layout.task_size_max {
            code |= PageFaultCode::PROT;
        }
        self.task.set_fault_info(TaskFaultInfo {
            trap_nr: TRAP_PAGE_FAULT,
            error_code: code | PageFaultCode::USER,
            address: ctx.address,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{Harness, kernel_frame, user_frame};
    use faultline_abi::signal::SEGV_ACCERR;

    const USER_ADDR: u64 = 0x40_0000;

    #[test]
    fn error_mask_and_hindex() {
        assert!(VmFaultFlags::SIGSEGV.is_error());
        assert!(!(VmFaultFlags::MAJOR | VmFaultFlags::RETRY).is_error());
        let poison = VmFaultFlags::hwpoison_large(1);
        assert!(poison.is_error());
        assert_eq!(poison.hwpoison_hindex(), 1);
        assert_eq!(FaultFlags::DEFAULT.bits(), 0x214);
    }

    #[test]
    fn user_oom_calls_oom_handler() {
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER | PageFaultCode::WRITE);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h.handler().mm_fault_error(&mut ctx, VmFaultFlags::OOM);
        assert_eq!(outcome, FaultOutcome::OutOfMemory);
        assert_eq!(h.oom.calls(), 1);
        assert!(h.signals.delivered().is_empty());
    }

    #[test]
    fn kernel_oom_goes_to_fixup() {
        let h = Harness::new().with_fixup(0xffff_ffff_8100_0000, 0xffff_ffff_8100_0800);
        let mut frame = kernel_frame(PageFaultCode::WRITE, 0xffff_ffff_8100_0000);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h.handler().mm_fault_error(&mut ctx, VmFaultFlags::OOM);
        assert_eq!(
            outcome,
            FaultOutcome::FixedUp {
                resume_at: 0xffff_ffff_8100_0800,
                signaled: false
            }
        );
        assert_eq!(h.oom.calls(), 0);
    }

    #[test]
    fn hwpoison_reports_extent() {
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h.handler().mm_fault_error(&mut ctx, VmFaultFlags::HWPOISON);
        let expected = FaultSigInfo::new(SIGBUS, BUS_MCEERR_AR, VirtAddr::new(USER_ADDR))
            .with_addr_lsb(12);
        assert_eq!(outcome, FaultOutcome::Signaled(expected));

        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h
            .handler()
            .mm_fault_error(&mut ctx, VmFaultFlags::hwpoison_large(0));
        assert!(matches!(
            outcome,
            FaultOutcome::Signaled(FaultSigInfo {
                addr_lsb: Some(21),
                ..
            })
        ));
        assert_eq!(h.signals.delivered().len(), 2);
        assert!(h.task.fault_info().is_some());
    }

    #[test]
    fn small_page_poison_wins_over_large() {
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let both = VmFaultFlags::HWPOISON | VmFaultFlags::hwpoison_large(1);
        assert!(matches!(
            h.handler().mm_fault_error(&mut ctx, both),
            FaultOutcome::Signaled(FaultSigInfo {
                code: BUS_MCEERR_AR,
                addr_lsb: Some(12),
                ..
            })
        ));
    }

    #[test]
    fn plain_sigbus_and_sigsegv() {
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        assert_eq!(
            h.handler().mm_fault_error(&mut ctx, VmFaultFlags::SIGBUS),
            FaultOutcome::Signaled(FaultSigInfo::new(SIGBUS, BUS_ADRERR, VirtAddr::new(USER_ADDR)))
        );

        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        assert_eq!(
            h.handler().mm_fault_error(&mut ctx, VmFaultFlags::SIGSEGV),
            FaultOutcome::Signaled(FaultSigInfo::new(SIGSEGV, SEGV_MAPERR, VirtAddr::new(USER_ADDR)))
        );
    }

    #[test]
    fn unknown_resolver_result_dies() {
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        assert_eq!(
            h.handler().mm_fault_error(&mut ctx, VmFaultFlags::FALLBACK),
            FaultOutcome::Fatal(FatalFault::UnexpectedResult(VmFaultFlags::FALLBACK))
        );
        assert_eq!(h.cpu.deaths(), 1);
        assert!(h.signals.delivered().is_empty());
    }

    #[test]
    fn user_access_to_kernel_address_reports_protection() {
        let h = Harness::new();
        let kaddr = VirtAddr::new(0xffff_8880_0000_1000);
        let mut frame = user_frame(PageFaultCode::USER);
        let mut ctx = FaultContext::new(&mut frame, kaddr);
        let outcome = h.handler().bad_area_nosemaphore(&mut ctx, SEGV_MAPERR, None);
        assert_eq!(
            outcome,
            FaultOutcome::Signaled(FaultSigInfo::new(SIGSEGV, SEGV_MAPERR, kaddr))
        );
        let info = h.task.fault_info().expect("archinfo recorded");
        assert_eq!(info.trap_nr, TRAP_PAGE_FAULT);
        assert!(info.error_code.contains(PageFaultCode::PROT | PageFaultCode::USER));
        assert!(!h.cpu.irqs_enabled());
    }

    #[test]
    fn vsyscall_fault_code_is_sanitized() {
        let h = Harness::new();
        let addr = VirtAddr::new(crate::memory_layout_defs::VSYSCALL_ADDR);
        let mut frame = user_frame(PageFaultCode::USER | PageFaultCode::INSTR);
        let mut ctx = FaultContext::new(&mut frame, addr);
        let outcome = h.handler().bad_area_nosemaphore(&mut ctx, SEGV_MAPERR, None);
        assert!(ctx.code.contains(PageFaultCode::PROT));
        assert_eq!(
            outcome,
            FaultOutcome::Signaled(FaultSigInfo::new(SIGSEGV, SEGV_MAPERR, addr))
        );
    }

    #[test]
    fn pkey_only_accompanies_pkuerr() {
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER | PageFaultCode::WRITE);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h.handler().bad_area_nosemaphore(&mut ctx, SEGV_ACCERR, Some(3));
        assert_eq!(
            outcome,
            FaultOutcome::Signaled(FaultSigInfo::new(SIGSEGV, SEGV_ACCERR, VirtAddr::new(USER_ADDR)))
        );
        let mut frame = user_frame(PageFaultCode::USER | PageFaultCode::WRITE);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h.handler().bad_area_nosemaphore(&mut ctx, SEGV_PKUERR, Some(3));
        assert!(matches!(
            outcome,
            FaultOutcome::Signaled(FaultSigInfo { pkey: Some(3), .. })
        ));
        assert_eq!(h.signals.delivered().len(), 2);
    }

    #[test]
    fn fixup_in_interrupt_sends_nothing() {
        let mut h = Harness::new().with_fixup(0xffff_ffff_8100_0040, 0xffff_ffff_8100_0900);
        h.task.in_interrupt = true;
        h.task.sig_on_uaccess_err = true;
        let mut frame = kernel_frame(PageFaultCode::empty(), 0xffff_ffff_8100_0040);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        let outcome = h.handler().no_context(&mut ctx, SIGSEGV, SEGV_MAPERR);
        assert_eq!(
            outcome,
            FaultOutcome::FixedUp {
                resume_at: 0xffff_ffff_8100_0900,
                signaled: false
            }
        );
        assert_eq!(frame.rip, 0xffff_ffff_8100_0900);
        assert!(h.signals.delivered().is_empty());
    }

    #[test]
    fn kernel_stack_guard_is_fatal() {
        let mut h = Harness::new();
        let bottom = 0xffff_c900_0010_0000;
        h.task.kernel_stack = Some(bottom..bottom + 0x4000);
        let mut frame = kernel_frame(PageFaultCode::WRITE, 0xffff_ffff_8100_0000);
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(bottom - 8));
        assert_eq!(
            h.handler().no_context(&mut ctx, SIGSEGV, SEGV_MAPERR),
            FaultOutcome::Fatal(FatalFault::KernelStackOverflow)
        );
        assert_eq!(h.cpu.deaths(), 1);
    }

    #[test]
    fn implicit_supervisor_access_oopses_even_with_fixup() {
        let h = Harness::new().with_fixup(0x40_1000, 0x40_2000);
        let mut frame = user_frame(PageFaultCode::empty());
        frame.rip = 0x40_1000;
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(USER_ADDR));
        assert_eq!(
            h.handler().no_context(&mut ctx, SIGSEGV, SEGV_MAPERR),
            FaultOutcome::Fatal(FatalFault::KernelOops)
        );
        assert_eq!(frame.rip, 0x40_1000);
        assert_eq!(h.cpu.deaths(), 1);
    }

    #[test]
    fn truncated_kernel_rip_is_repaired_by_default() {
        let h = Harness::new();
        let mut frame = kernel_frame(PageFaultCode::INSTR, 0x8100_1234);
        assert_eq!(
            h.handler()
                .handle_page_fault(&mut frame, VirtAddr::new(0x8100_1234)),
            FaultOutcome::Erratum(Erratum::Amd93)
        );
        assert_eq!(frame.rip, 0xffff_ffff_8100_1234);
        assert_eq!(h.cpu.deaths(), 0);
        assert_eq!(h.stats.snapshot().errata, 1);
    }

    #[test]
    fn f00f_alias_becomes_invalid_opcode() {
        let mut h = Harness::new();
        h.config.quirks.f00f_idt_alias = Some(0xffff_ffff_ff5f_e000);
        let mut frame = user_frame(PageFaultCode::empty());
        frame.rip = 0x40_0123;
        let mut ctx = FaultContext::new(&mut frame, VirtAddr::new(0xffff_ffff_ff5f_e030));
        assert_eq!(
            h.handler().bad_area_nosemaphore(&mut ctx, SEGV_MAPERR, None),
            FaultOutcome::Erratum(Erratum::F00f)
        );
        assert_eq!(
            h.signals.delivered(),
            std::vec![FaultSigInfo::new(SIGILL, ILL_ILLOPN, VirtAddr::new(0x40_0123))]
        );
    }
}
