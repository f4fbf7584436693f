//! Descriptor table registers, captured for oops reports.

use core::arch::asm;
use x86_64::instructions::tables::{sgdt, sidt};

use crate::kdiag::{DescriptorTableRegister, DescriptorTables};

pub fn read_descriptor_tables() -> DescriptorTables {
    let idt = sidt();
    let gdt = sgdt();
    let (ldtr, tr): (u16, u16);
    unsafe {
        asm!("sldt {0:x}", out(reg) ldtr, options(nomem, nostack, preserves_flags));
        asm!("str {0:x}", out(reg) tr, options(nomem, nostack, preserves_flags));
    }
    DescriptorTables {
        idt: DescriptorTableRegister {
            base: idt.base.as_u64(),
            limit: idt.limit,
        },
        gdt: DescriptorTableRegister {
            base: gdt.base.as_u64(),
            limit: gdt.limit,
        },
        ldtr,
        tr,
    }
}
