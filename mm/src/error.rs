//! Unified error types for the memory management subsystem.
//!
//! Every fallible address-space, region-tree and page-table operation
//! returns [`MmResult`]. Fault classification outcomes are not errors in
//! this sense and live in [`crate::fault::outcome`].

use crate::paging::page_table_defs::PageTableLevel;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    InvalidRange { start: u64, end: u64 },
    NotAligned { address: u64, required: u64 },
    NotMapped { address: u64, level: PageTableLevel },
    InvalidPageTable,
    Overlap { start: u64, end: u64 },
    NoVma,
    NotGrowable,
    StackGuardGap { address: u64 },
    StackLimit { requested: u64, limit: u64 },
    BelowMmapMin { address: u64 },
    AddressSpaceDead,
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange { start, end } => {
                write!(f, "invalid range [{:#x}, {:#x})", start, end)
            }
            Self::NotAligned { address, required } => {
                write!(f, "address {:#x} not aligned to {:#x}", address, required)
            }
            Self::NotMapped { address, level } => {
                write!(
                    f,
                    "address {:#x} not mapped (stopped at level {})",
                    address, level
                )
            }
            Self::InvalidPageTable => write!(f, "invalid page table pointer"),
            Self::Overlap { start, end } => {
                write!(
                    f,
                    "range [{:#x}, {:#x}) overlaps an existing region",
                    start, end
                )
            }
            Self::NoVma => write!(f, "no VMA covers the faulting address"),
            Self::NotGrowable => write!(f, "region does not grow down"),
            Self::StackGuardGap { address } => {
                write!(f, "stack growth to {:#x} would breach the guard gap", address)
            }
            Self::StackLimit { requested, limit } => {
                write!(f, "stack size {:#x} exceeds limit {:#x}", requested, limit)
            }
            Self::BelowMmapMin { address } => {
                write!(f, "address {:#x} below mmap_min_addr", address)
            }
            Self::AddressSpaceDead => write!(f, "address space has no remaining users"),
        }
    }
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
