//! Bare-metal glue: the real CPU behind [`CpuOps`] and the vector 14 entry.

use faultline_abi::addr::{PhysAddr, VirtAddr};
use faultline_abi::fault::PageFaultCode;
use faultline_lib::cpu::{self, CR3_ADDR_MASK, Cr4Flags};
use faultline_lib::{DescriptorTables, InterruptFrame, kdiag_dump_interrupt_frame, klog_error};

use super::env::{CpuFeatures, CpuOps};
use super::handler::FaultHandler;
use super::outcome::FaultOutcome;
use crate::paging::{HhdmMapping, PageTableWalker, PagingMode};

pub struct X86Cpu {
    hhdm_offset: u64,
    walker: PageTableWalker<HhdmMapping>,
}

impl X86Cpu {
    pub const fn new(hhdm_offset: u64, mode: PagingMode) -> Self {
        Self {
            hhdm_offset,
            walker: PageTableWalker::new(HhdmMapping::new(hhdm_offset), mode),
        }
    }

    /// Physical address backing `address` in the loaded root, if every level
    /// is present (and user-accessible when `user` is set).
    fn translate(&self, address: u64, user: bool) -> Option<PhysAddr> {
        let chain = self
            .walker
            .walk_chain(self.current_root(), VirtAddr::new(address));
        if !chain.is_mapped() || (user && !chain.links().all(|link| link.entry.is_user())) {
            return None;
        }
        let leaf = chain.terminal()?;
        let offset = address & (leaf.level.entry_size() - 1);
        Some(leaf.entry.address().offset(offset))
    }
}

impl CpuOps for X86Cpu {
    fn local_irq_enable(&self) {
        cpu::enable_interrupts();
    }

    fn local_irq_disable(&self) {
        cpu::disable_interrupts();
    }

    fn current_root(&self) -> PhysAddr {
        PhysAddr::new(cpu::read_cr3() & CR3_ADDR_MASK)
    }

    fn read_byte_nofault(&self, address: u64, user: bool) -> Option<u8> {
        let phys = self.translate(address, user)?;
        let ptr = self.hhdm_offset.wrapping_add(phys.as_u64()) as *const u8;
        // SAFETY: `phys` is backed by a present translation and the direct
        // map covers all of physical memory.
        Some(unsafe { core::ptr::read_volatile(ptr) })
    }

    fn descriptor_tables(&self) -> Option<DescriptorTables> {
        Some(cpu::read_descriptor_tables())
    }

    fn features(&self) -> CpuFeatures {
        let cr4 = cpu::read_cr4_flags();
        CpuFeatures {
            smap: cr4.contains(Cr4Flags::SMAP),
            smep: cr4.contains(Cr4Flags::SMEP),
            ospke: cr4.contains(Cr4Flags::PKE),
        }
    }

    fn pkru(&self) -> u32 {
        if cpu::read_cr4_flags().contains(Cr4Flags::PKE) {
            cpu::read_pkru()
        } else {
            0
        }
    }

    fn die(&self, reason: &str, frame: &InterruptFrame, code: PageFaultCode) {
        klog_error!("{}: {:#06x}", reason, code.bits());
        kdiag_dump_interrupt_frame(frame);
        panic!("{}", reason);
    }
}

/// Vector 14 entry: read the faulting address from CR2 and run the pipeline.
pub fn exc_page_fault(handler: &FaultHandler<'_>, frame: &mut InterruptFrame) -> FaultOutcome {
    let address = VirtAddr::new(cpu::read_cr2());
    handler.handle_page_fault(frame, address)
}
