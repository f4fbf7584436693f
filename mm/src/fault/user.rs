//! Faults on user-half addresses, including the legacy vsyscall page.

use faultline_abi::fault::PageFaultCode;
use faultline_abi::signal::SEGV_MAPERR;
use faultline_lib::klog_debug;

use super::access::{PkeyPolicy, access_error};
use super::classify::is_vsyscall_vaddr;
use super::descriptor::FaultContext;
use super::handler::FaultHandler;
use super::outcome::{FaultFailure, FaultFlags, FaultOutcome, VmFaultFlags};

const BAD_AREA: FaultFailure = FaultFailure::BadArea {
    si_code: SEGV_MAPERR,
    pkey: None,
};

impl FaultHandler<'_> {
    pub(super) fn do_user_addr_fault(&self, ctx: &mut FaultContext<'_>) -> FaultOutcome {
        match self.user_addr_fault(ctx) {
            Ok(outcome) => outcome,
            Err(failure) => self.dispatch_failure(ctx, failure),
        }
    }

    fn user_addr_fault(&self, ctx: &mut FaultContext<'_>) -> Result<FaultOutcome, FaultFailure> {
        if self.hooks.kprobe(ctx.frame) {
            return Ok(FaultOutcome::Hooked);
        }
        if ctx.code.contains(PageFaultCode::RSVD) {
            return Err(FaultFailure::PageTableCorrupt);
        }

        let features = self.cpu.features();
        if features.smap && !ctx.code.is_user() && !ctx.ac_flag() {
            return Err(BAD_AREA);
        }

        let mm = match self.task.mm() {
            Some(mm) if !self.task.faulthandler_disabled() => mm,
            _ => return Err(BAD_AREA),
        };

        let mut flags = FaultFlags::DEFAULT;
        if ctx.user_mode() {
            self.cpu.local_irq_enable();
            flags |= FaultFlags::USER;
        } else if ctx.irqs_were_enabled() {
            self.cpu.local_irq_enable();
        }
        if ctx.code.is_write() {
            flags |= FaultFlags::WRITE;
        }
        if ctx.code.is_instruction_fetch() {
            flags |= FaultFlags::INSTRUCTION;
        }

        if is_vsyscall_vaddr(&self.config.layout, ctx.address)
            && self.hooks.emulate_vsyscall(ctx.frame, ctx.code, ctx.address)
        {
            return Ok(FaultOutcome::Emulated);
        }

        // A kernel fault with no fixup may have been raised with the mmap
        // lock already held by this CPU; blocking would deadlock.
        let mut guard = match mm.mmap_try_read() {
            Some(guard) => guard,
            None => {
                if !ctx.code.is_user() && self.extable.search(ctx.rip()).is_none() {
                    return Err(BAD_AREA);
                }
                mm.mmap_read()
            }
        };

        let pkeys = PkeyPolicy::new(features.ospke, self.cpu.pkru());
        let address = ctx.address.as_u64();

        loop {
            let Some(tree) = guard.tree() else {
                return Err(BAD_AREA);
            };
            let Some(vma) = tree.find_vma(address) else {
                return Err(BAD_AREA);
            };
            if vma.start() > address {
                if !vma.flags.grows_down() {
                    return Err(BAD_AREA);
                }
                if let Err(err) = mm.expand_stack(tree, vma, address, &self.config.stack) {
                    klog_debug!("page fault: stack growth to {:#x} refused: {}", address, err);
                    return Err(BAD_AREA);
                }
            }
            let desc = vma.desc();

            if let Err(violation) = access_error(ctx.code, &desc, &pkeys) {
                return Err(FaultFailure::BadArea {
                    si_code: violation.si_code(),
                    pkey: violation.pkey(),
                });
            }

            let fault = self
                .resolver
                .handle_mm_fault(mm, &desc, ctx.address, flags, &mut guard);

            if fault.contains(VmFaultFlags::RETRY) {
                // The resolver has already dropped the lock.
                if self.task.fatal_signal_pending()
                    || (ctx.user_mode() && self.task.signal_pending())
                {
                    return Err(FaultFailure::SignalPending);
                }
                if flags.contains(FaultFlags::ALLOW_RETRY) {
                    flags |= FaultFlags::TRIED;
                    self.stats.count_retry();
                    guard.relock();
                    continue;
                }
            }
            guard.unlock();

            if fault.is_error() {
                return Err(FaultFailure::VmFault(fault));
            }
            let major = fault.contains(VmFaultFlags::MAJOR);
            mm.count_fault(major);
            return Ok(FaultOutcome::Resolved { major });
        }
    }
}
