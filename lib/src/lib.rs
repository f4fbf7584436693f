#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(target_arch = "x86_64")]
pub mod cpu;

pub mod cmdline;
pub mod kdiag;
pub mod klog;

pub use kdiag::{DescriptorTableRegister, DescriptorTables, InterruptFrame, RFLAGS_AC, RFLAGS_IF, kdiag_dump_interrupt_frame};
pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
