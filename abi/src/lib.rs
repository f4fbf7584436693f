//! Faultline hardware and user ABI types.
//!
//! This crate holds the definitions shared between the fault pipeline and the
//! world outside it: address newtypes, the bit-exact page fault error code
//! pushed by the CPU, and the signal numbers and sub-codes handed to user
//! space when a fault cannot be resolved.

#![no_std]
#![forbid(unsafe_code)]

pub mod addr;
pub mod fault;
pub mod signal;

/// Standard 4KB page size.
pub const PAGE_SIZE: u64 = 0x1000;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u8 = 12;

pub use addr::*;
pub use fault::{PageFaultCode, TRAP_PAGE_FAULT};
pub use signal::*;
