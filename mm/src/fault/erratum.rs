//! Processor quirks that raise page faults which are not real faults.

use core::sync::atomic::{AtomicBool, Ordering};

use faultline_abi::addr::VirtAddr;
use faultline_abi::fault::PageFaultCode;
use faultline_lib::{InterruptFrame, klog_warn};

use super::env::CpuOps;
use crate::config::CpuQuirks;
use crate::memory_layout_defs::FaultLayout;

/// Longest legal x86 instruction.
const MAX_INSN_LEN: u64 = 15;

/// 64-bit and compatibility-mode user code selectors.
const USER_CS_64: u64 = 0x33;
const USER_CS_32: u64 = 0x23;
/// Table indicator bit of a selector: descriptor comes from the LDT.
const SELECTOR_TI_LDT: u64 = 1 << 2;

/// IDT vector whose descriptor the F00F lockup makes the CPU touch.
const F00F_VECTOR: u64 = 6;

static ERRATA93_WARNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Erratum {
    /// Prefetch instruction touched an unmapped address (AMD).
    Prefetch,
    /// AMD K8 #93: rip truncated to 32 bits on return.
    Amd93,
    /// AMD K8 #100: bogus high address from compatibility mode.
    Amd100,
    /// Pentium F00F workaround: #UD delivered through a read-only IDT.
    F00f,
}

fn user_64bit_mode(frame: &InterruptFrame) -> bool {
    frame.cs == USER_CS_64
}

enum Scan {
    Continue,
    Stop,
    Prefetch,
}

fn check_prefetch_opcode(
    cpu: &dyn CpuOps,
    frame: &InterruptFrame,
    next: u64,
    opcode: u8,
    user: bool,
) -> Scan {
    let hi = opcode & 0xf0;
    let lo = opcode & 0x0f;
    match hi {
        // Segment overrides 0x26, 0x2E, 0x36, 0x3E.
        0x20 | 0x30 if lo & 7 == 0x6 => Scan::Continue,
        // REX prefixes, only meaningful in 64-bit code.
        0x40 if !frame.is_user_mode() || user_64bit_mode(frame) => Scan::Continue,
        // FS/GS overrides, operand and address size (0x64..0x67).
        0x60 if lo & 0xc == 0x4 => Scan::Continue,
        // LOCK, REPNE, REP.
        0xf0 if lo == 0 || lo >> 1 == 1 => Scan::Continue,
        // Two-byte escape: PREFETCH is 0F 0D or 0F 18.
        0x00 if lo == 0xf => match cpu.read_byte_nofault(next, user) {
            Some(0x0d | 0x18) => Scan::Prefetch,
            _ => Scan::Stop,
        },
        _ => Scan::Stop,
    }
}

/// Some CPUs report faults for prefetches of unmapped addresses. Decode the
/// instruction at rip and swallow the fault if it is one.
pub fn is_prefetch(
    cpu: &dyn CpuOps,
    layout: &FaultLayout,
    frame: &InterruptFrame,
    code: PageFaultCode,
) -> bool {
    // An instruction fetch from an NX page is never a prefetch.
    if code.is_instruction_fetch() {
        return false;
    }
    let user = frame.is_user_mode();
    let start = frame.rip;
    if user && start >= layout.task_size_max {
        return false;
    }

    let end = start.saturating_add(MAX_INSN_LEN);
    let mut insn = start;
    while insn < end {
        let Some(opcode) = cpu.read_byte_nofault(insn, user) else {
            return false;
        };
        insn += 1;
        match check_prefetch_opcode(cpu, frame, insn, opcode, user) {
            Scan::Continue => {}
            Scan::Stop => return false,
            Scan::Prefetch => return true,
        }
    }
    false
}

/// AMD K8 erratum #93: rip loses its upper half on return from a nested
/// interrupt. If the sign-extended value lands in kernel text or a module,
/// repair rip and resume.
pub fn is_errata93(
    quirks: &CpuQuirks,
    layout: &FaultLayout,
    frame: &mut InterruptFrame,
    address: VirtAddr,
) -> bool {
    if !quirks.amd_k8 || frame.is_user_mode() {
        return false;
    }
    let address = address.as_u64();
    if address != frame.rip || address >> 32 != 0 {
        return false;
    }
    let extended = address | (0xffff_ffffu64 << 32);
    if layout.is_kernel_text(extended) || layout.is_module_addr(extended) {
        if !ERRATA93_WARNED.swap(true, Ordering::Relaxed) {
            klog_warn!("page fault: CPU erratum #93 hit, BIOS fix is missing; working around it");
        }
        frame.rip = extended;
        return true;
    }
    false
}

/// AMD K8 erratum #100: compatibility-mode code may fault with garbage in
/// the upper half of the address.
pub fn is_errata100(quirks: &CpuQuirks, frame: &InterruptFrame, address: VirtAddr) -> bool {
    quirks.amd_k8
        && (frame.cs == USER_CS_32 || frame.cs & SELECTOR_TI_LDT != 0)
        && address.as_u64() >> 32 != 0
}

/// The F00F workaround maps the IDT read-only, so the lockup sequence
/// turns into a supervisor write fault on the #UD descriptor.
pub fn is_f00f_bug(quirks: &CpuQuirks, code: PageFaultCode, address: VirtAddr) -> bool {
    let Some(idt) = quirks.f00f_idt_alias else {
        return false;
    };
    !code.is_user() && address.as_u64().wrapping_sub(idt) >> 3 == F00F_VECTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_layout_defs::DEFAULT_FAULT_LAYOUT;
    use crate::test_fixtures::{MockCpu, kernel_frame, user_frame};

    const RIP: u64 = 0x40_1000;

    fn at(code: &[u8]) -> MockCpu {
        let cpu = MockCpu::new();
        cpu.poke(RIP, code);
        cpu
    }

    fn frame() -> InterruptFrame {
        let mut frame = user_frame(PageFaultCode::USER);
        frame.rip = RIP;
        frame
    }

    #[test]
    fn recognises_prefetch_opcodes() {
        let layout = DEFAULT_FAULT_LAYOUT;
        let code = PageFaultCode::USER;
        // prefetchw (%rax)
        assert!(is_prefetch(&at(&[0x0f, 0x0d, 0x08]), &layout, &frame(), code));
        // fs; prefetcht0
        assert!(is_prefetch(&at(&[0x64, 0x0f, 0x18, 0x08]), &layout, &frame(), code));
        // REX.W prefix in 64-bit user code
        assert!(is_prefetch(&at(&[0x48, 0x0f, 0x18, 0x00]), &layout, &frame(), code));
        // mov (%rax), %eax
        assert!(!is_prefetch(&at(&[0x8b, 0x00]), &layout, &frame(), code));
        // 0F escape for something else
        assert!(!is_prefetch(&at(&[0x0f, 0xb6, 0x00]), &layout, &frame(), code));
    }

    #[test]
    fn prefetch_scan_limits() {
        let layout = DEFAULT_FAULT_LAYOUT;
        let code = PageFaultCode::USER;
        let cpu = at(&[0x0f, 0x0d]);
        assert!(!is_prefetch(&cpu, &layout, &frame(), code | PageFaultCode::INSTR));

        // Fifteen prefixes leave no room for the opcode.
        let mut long = [0x66u8; 17];
        long[15] = 0x0f;
        long[16] = 0x18;
        assert!(!is_prefetch(&at(&long), &layout, &frame(), code));

        // Unreadable instruction bytes.
        assert!(!is_prefetch(&MockCpu::new(), &layout, &frame(), code));
    }

    #[test]
    fn errata93_repairs_truncated_rip() {
        let quirks = CpuQuirks {
            amd_k8: true,
            ..CpuQuirks::default()
        };
        let layout = DEFAULT_FAULT_LAYOUT;
        let mut frame = kernel_frame(PageFaultCode::INSTR, 0x8100_1234);
        assert!(is_errata93(&quirks, &layout, &mut frame, VirtAddr::new(0x8100_1234)));
        assert_eq!(frame.rip, 0xffff_ffff_8100_1234);

        let mut frame = kernel_frame(PageFaultCode::INSTR, 0x1234);
        assert!(!is_errata93(&quirks, &layout, &mut frame, VirtAddr::new(0x1234)));
        assert_eq!(frame.rip, 0x1234);

        let mut frame = kernel_frame(PageFaultCode::INSTR, 0x8100_1234);
        assert!(!is_errata93(
            &CpuQuirks {
                amd_k8: false,
                ..CpuQuirks::default()
            },
            &layout,
            &mut frame,
            VirtAddr::new(0x8100_1234)
        ));
    }

    #[test]
    fn errata100_needs_compat_segment() {
        let quirks = CpuQuirks {
            amd_k8: true,
            ..CpuQuirks::default()
        };
        let mut frame = user_frame(PageFaultCode::USER);
        assert!(!is_errata100(&quirks, &frame, VirtAddr::new(0x1_0000_0000)));
        frame.cs = USER_CS_32;
        assert!(is_errata100(&quirks, &frame, VirtAddr::new(0x1_0000_0000)));
        assert!(!is_errata100(&quirks, &frame, VirtAddr::new(0xffff_f000)));
        frame.cs = 0x07;
        assert!(is_errata100(&quirks, &frame, VirtAddr::new(0x1_0000_0000)));
    }

    #[test]
    fn f00f_matches_only_invalid_opcode_slot() {
        let quirks = CpuQuirks {
            f00f_idt_alias: Some(0xffff_ffff_ff5f_e000),
            ..CpuQuirks::default()
        };
        let code = PageFaultCode::PROT;
        assert!(is_f00f_bug(&quirks, code, VirtAddr::new(0xffff_ffff_ff5f_e030)));
        assert!(is_f00f_bug(&quirks, code, VirtAddr::new(0xffff_ffff_ff5f_e037)));
        assert!(!is_f00f_bug(&quirks, code, VirtAddr::new(0xffff_ffff_ff5f_e038)));
        assert!(!is_f00f_bug(
            &quirks,
            code | PageFaultCode::USER,
            VirtAddr::new(0xffff_ffff_ff5f_e030)
        ));
        assert!(!is_f00f_bug(
            &CpuQuirks::default(),
            code,
            VirtAddr::new(0xffff_ffff_ff5f_e030)
        ));
    }
}
