#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod address_space;
pub mod config;
pub mod error;
pub mod extable;
pub mod fault;
pub mod memory_layout_defs;
pub mod paging;
pub mod paging_defs;
pub mod registry;
pub mod vma_flags;
pub mod vma_tree;

#[cfg(test)]
mod test_fixtures;

pub use address_space::{AddressSpace, AddressSpaceKind, MmCounters, MmUsers, MmapReadGuard};
pub use config::{CpuQuirks, FaultConfig, StackLimits, config_from_cmdline};
pub use error::{MmError, MmResult};
pub use extable::{ExceptionTable, ExceptionTableEntry, ExtableError};
pub use fault::{FaultHandler, FaultOutcome, FaultStats, FatalFault};
pub use registry::AddressSpaceRegistry;
pub use vma_flags::{VmaBacking, VmaFlags};
pub use vma_tree::{Vma, VmaDesc, VmaTree};
