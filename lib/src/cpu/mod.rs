//! x86_64 register and descriptor-table access for the fault path.

pub mod control_regs;
pub mod interrupts;
pub mod tables;

pub use control_regs::*;
pub use interrupts::*;
pub use tables::*;
