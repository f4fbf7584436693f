//! Diagnostics printed when a fault cannot be handled.

use faultline_abi::fault::PageFaultCode;
use faultline_abi::signal::signal_name;
use faultline_lib::{DescriptorTableRegister, klog_error, klog_info};

use super::descriptor::FaultContext;
use super::env::{CpuOps, CurrentTask};
use crate::paging::{ChainEnd, PageTableFrameMapping, PageTableWalker};
use crate::paging_defs::PAGE_SIZE_4KB;

/// Bytes of code shown after a user segfault line.
const CODE_BYTES: u64 = 15;

fn access_kind(code: PageFaultCode) -> &'static str {
    if code.is_instruction_fetch() {
        "instruction fetch"
    } else if code.is_write() {
        "write access"
    } else {
        "read access"
    }
}

fn error_cause(code: PageFaultCode) -> &'static str {
    if !code.is_protection_violation() {
        "not-present page"
    } else if code.contains(PageFaultCode::RSVD) {
        "reserved bit violation"
    } else if code.contains(PageFaultCode::PK) {
        "protection keys violation"
    } else {
        "permissions violation"
    }
}

/// Print every paging-structure entry on the way to the faulting address
/// in the currently loaded root.
pub fn dump_pagetable<M: PageTableFrameMapping>(
    cpu: &dyn CpuOps,
    walker: &PageTableWalker<M>,
    address: u64,
) {
    let root = cpu.current_root();
    let chain = walker.walk_chain(root, faultline_abi::addr::VirtAddr::new(address));
    klog_error!("root {:#x}", root.as_u64());
    for link in chain.links() {
        klog_error!("  {} {:#018x}", link.level, link.entry.as_raw());
    }
    if let ChainEnd::BadTable(table) = chain.end() {
        klog_error!("  bad table at {:#x}", table.as_u64());
    }
}

fn read_u64_nofault(cpu: &dyn CpuOps, address: u64) -> Option<u64> {
    let mut value = 0u64;
    for i in 0..8 {
        let byte = cpu.read_byte_nofault(address.wrapping_add(i), false)?;
        value |= (byte as u64) << (i * 8);
    }
    Some(value)
}

/// Decode the system descriptor (LDT or TSS) `selector` names in the GDT.
pub fn show_ldttss(cpu: &dyn CpuOps, gdt: &DescriptorTableRegister, name: &str, selector: u16) {
    let offset = (selector & !7) as u64;
    if offset == 0 {
        klog_error!("{}: NULL", name);
        return;
    }
    if offset + 15 > gdt.limit as u64 {
        klog_error!("{}: {:#x} -- out of bounds", name, selector);
        return;
    }
    let addr = gdt.base.wrapping_add(offset);
    let (Some(low), Some(high)) = (
        read_u64_nofault(cpu, addr),
        read_u64_nofault(cpu, addr + 8),
    ) else {
        klog_error!("{}: {:#x} -- GDT entry is not readable", name, selector);
        return;
    };
    let base = ((low >> 16) & 0xff_ffff)
        | (((low >> 56) & 0xff) << 24)
        | ((high & 0xffff_ffff) << 32);
    let limit = (low & 0xffff) | (((low >> 48) & 0xf) << 16);
    klog_error!(
        "{}: {:#x} -- base={:#x} limit={:#x}",
        name,
        selector,
        base,
        limit
    );
}

/// The opening lines of an oops.
pub fn show_fault_oops<M: PageTableFrameMapping>(
    cpu: &dyn CpuOps,
    walker: &PageTableWalker<M>,
    task: &dyn CurrentTask,
    ctx: &FaultContext<'_>,
) {
    let address = ctx.address.as_u64();
    let code = ctx.code;

    if code.is_instruction_fetch() {
        let chain = walker.walk_chain(cpu.current_root(), ctx.address);
        if let Some(leaf) = chain.terminal().filter(|_| chain.is_mapped()) {
            if !leaf.entry.is_executable() {
                klog_error!(
                    "kernel tried to execute NX-protected page - exploit attempt? (pid: {})",
                    task.pid()
                );
            } else if chain.links().next().is_some_and(|top| top.entry.is_user())
                && cpu.features().smep
            {
                klog_error!(
                    "unable to execute userspace code (SMEP?) (pid: {})",
                    task.pid()
                );
            }
        }
    }

    if address < PAGE_SIZE_4KB && !ctx.user_mode() {
        klog_error!("BUG: kernel NULL pointer dereference, address: {:#018x}", address);
    } else {
        klog_error!("BUG: unable to handle page fault for address: {:#018x}", address);
    }
    klog_error!(
        "#PF: {} {} in {} mode",
        if code.is_user() { "user" } else { "supervisor" },
        access_kind(code),
        if ctx.user_mode() { "user" } else { "kernel" }
    );
    klog_error!("#PF: error_code({:#06x}) - {}", code.bits(), error_cause(code));

    if !code.is_user() && ctx.user_mode() {
        klog_error!("This was a system access from user code");
        if let Some(tables) = cpu.descriptor_tables() {
            klog_error!(
                "IDT: {:#x} (limit={:#x}) GDT: {:#x} (limit={:#x})",
                tables.idt.base,
                tables.idt.limit,
                tables.gdt.base,
                tables.gdt.limit
            );
            show_ldttss(cpu, &tables.gdt, "LDTR", tables.ldtr);
            show_ldttss(cpu, &tables.gdt, "TR", tables.tr);
        }
    }

    dump_pagetable(cpu, walker, address);
}

/// Reserved bits in a paging structure: the tables themselves are broken.
pub fn pgtable_bad<M: PageTableFrameMapping>(
    cpu: &dyn CpuOps,
    walker: &PageTableWalker<M>,
    task: &dyn CurrentTask,
    ctx: &FaultContext<'_>,
) {
    klog_error!(
        "{}: Corrupted page table at address {:#x}",
        task.comm(),
        ctx.address.as_u64()
    );
    dump_pagetable(cpu, walker, ctx.address.as_u64());
    cpu.die("Bad pagetable", ctx.frame, ctx.code);
}

/// One line per unhandled user fault, followed by the code bytes at rip.
pub fn show_signal_msg(
    cpu: &dyn CpuOps,
    task: &dyn CurrentTask,
    ctx: &FaultContext<'_>,
    signo: u8,
) {
    klog_info!(
        "{}[{}]: {} at {:#x} ip {:#x} sp {:#x} error {:#x}",
        task.comm(),
        task.pid(),
        if signo == faultline_abi::signal::SIGSEGV {
            "segfault"
        } else {
            signal_name(signo)
        },
        ctx.address.as_u64(),
        ctx.frame.rip,
        ctx.frame.rsp,
        ctx.code.bits()
    );

    let mut bytes = [0u8; CODE_BYTES as usize];
    let mut len = 0;
    for (i, slot) in bytes.iter_mut().enumerate() {
        match cpu.read_byte_nofault(ctx.frame.rip.wrapping_add(i as u64), true) {
            Some(b) => {
                *slot = b;
                len += 1;
            }
            None => break,
        }
    }
    if len > 0 {
        klog_info!("Code: {:02x?}", &bytes[..len]);
    } else {
        klog_info!("Code: Unable to access opcode bytes at {:#x}", ctx.frame.rip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::PagingMode;
    use crate::test_fixtures::{Harness, LogCapture, kernel_frame, user_frame};
    use faultline_abi::addr::VirtAddr;
    use faultline_lib::DescriptorTables;

    #[test]
    fn oops_names_null_dereference_and_cause() {
        let capture = LogCapture::start();
        let h = Harness::new();
        let mut frame = kernel_frame(PageFaultCode::WRITE, 0xffff_ffff_8100_0000);
        let ctx = FaultContext::new(&mut frame, VirtAddr::new(0x10));
        let walker = PageTableWalker::new(&h.tables, PagingMode::FOUR_LEVEL);
        show_fault_oops(&h.cpu, &walker, &h.task, &ctx);
        let log = capture.finish();
        assert!(log.iter().any(|l| l.contains("NULL pointer dereference")));
        assert!(log.iter().any(|l| l.contains("supervisor write access in kernel mode")));
        assert!(log.iter().any(|l| l.contains("not-present page")));
    }

    #[test]
    fn ldttss_decodes_gdt_descriptor() {
        let capture = LogCapture::start();
        let h = Harness::new();
        let gdt_base = 0xffff_ffff_8200_0000;
        // 64-bit TSS descriptor at selector 0x28: base 0xffff_8880_1234_5678, limit 0x67.
        let low: u64 = 0x67 | (0x34_5678u64 << 16) | (0x89u64 << 40) | (0x12u64 << 56);
        let high: u64 = 0xffff_8880;
        h.cpu.poke(gdt_base + 0x28, &low.to_le_bytes());
        h.cpu.poke(gdt_base + 0x30, &high.to_le_bytes());
        let gdt = DescriptorTableRegister {
            base: gdt_base,
            limit: 0x7f,
        };
        show_ldttss(&h.cpu, &gdt, "TR", 0x28);
        show_ldttss(&h.cpu, &gdt, "LDTR", 0);
        show_ldttss(&h.cpu, &gdt, "TR", 0x80);
        let log = capture.finish();
        assert!(log.iter().any(|l| l.contains("base=0xffff888012345678 limit=0x67")));
        assert!(log.iter().any(|l| l == "LDTR: NULL"));
        assert!(log.iter().any(|l| l.contains("out of bounds")));
    }

    #[test]
    fn system_access_from_user_code_shows_tables() {
        let capture = LogCapture::start();
        let mut h = Harness::new();
        h.cpu.tables = Some(DescriptorTables::default());
        let mut frame = user_frame(PageFaultCode::empty());
        let ctx = FaultContext::new(&mut frame, VirtAddr::new(0x40_0000));
        let walker = PageTableWalker::new(&h.tables, PagingMode::FOUR_LEVEL);
        show_fault_oops(&h.cpu, &walker, &h.task, &ctx);
        let log = capture.finish();
        assert!(log.iter().any(|l| l == "This was a system access from user code"));
        assert!(log.iter().any(|l| l == "TR: NULL"));
        assert_eq!(h.cpu.current_root(), h.user_root);
    }

    #[test]
    fn signal_msg_includes_code_bytes() {
        let capture = LogCapture::start();
        let h = Harness::new();
        let mut frame = user_frame(PageFaultCode::USER | PageFaultCode::WRITE);
        frame.rip = 0x40_1000;
        h.cpu.poke(0x40_1000, &[0x89, 0x07]);
        let ctx = FaultContext::new(&mut frame, VirtAddr::new(0x10));
        show_signal_msg(&h.cpu, &h.task, &ctx, faultline_abi::signal::SIGSEGV);
        let log = capture.finish();
        assert!(log.iter().any(|l| l.contains("segfault at 0x10 ip 0x401000")));
        assert!(log.iter().any(|l| l == "Code: [89, 07]"));
    }
}
