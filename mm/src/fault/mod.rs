//! Page fault resolution pipeline.
//!
//! [`FaultHandler::handle_page_fault`] classifies a fault by address,
//! hands kernel-half faults to the lock-free kernel resolver and user-half
//! faults to the region resolver, and turns whatever cannot be resolved
//! into a fixup, a signal, or a fatal oops.

pub mod access;
pub mod classify;
pub mod descriptor;
pub mod env;
pub mod erratum;
pub mod handler;
mod kernel;
pub mod oops;
pub mod outcome;
mod user;

#[cfg(target_arch = "x86_64")]
pub mod x86;

pub use access::{AccessViolation, PkeyPolicy, access_error};
pub use classify::{fault_in_kernel_space, is_vsyscall_vaddr};
pub use descriptor::FaultContext;
pub use env::{
    CpuFeatures, CpuOps, CurrentTask, FaultHooks, MemoryResolver, NoHooks, OomHandler,
    SignalSink, TaskFaultInfo,
};
pub use erratum::Erratum;
pub use handler::{FaultHandler, FaultStats, FaultStatsSnapshot};
pub use outcome::{FatalFault, FaultFailure, FaultFlags, FaultOutcome, VmFaultFlags};
