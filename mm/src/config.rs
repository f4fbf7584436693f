//! Runtime fault-handling policy, parsed from the boot command line.

use faultline_lib::cmdline::{parse_bool, parse_u64, tokens};

use crate::memory_layout_defs::{
    DEFAULT_FAULT_LAYOUT, DEFAULT_MMAP_MIN_ADDR, FaultLayout, LA57_FAULT_LAYOUT,
};
use crate::paging::PagingMode;
use crate::paging_defs::{PAGE_SIZE_4KB, PMD_SHIFT, PUD_SHIFT};

const DEFAULT_SHOW_UNHANDLED_SIGNALS: bool = true;
const DEFAULT_STACK_GUARD_GAP_PAGES: u64 = 256;
const DEFAULT_STACK_RLIMIT: u64 = 8 * 1024 * 1024;

/// Processor errata the fault path has to compensate for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuQuirks {
    /// AMD family 0Fh: errata #93 (truncated rip) and #100 (bogus high
    /// address from compatibility mode). On unless `pf.k8_errata=no`.
    pub amd_k8: bool,
    /// Read-only alias of the IDT installed to defuse the Pentium F00F
    /// lockup; faults on it are invalid-opcode traps in disguise.
    pub f00f_idt_alias: Option<u64>,
}

impl Default for CpuQuirks {
    fn default() -> Self {
        Self {
            amd_k8: true,
            f00f_idt_alias: None,
        }
    }
}

/// Limits applied when a grows-down region is extended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackLimits {
    pub guard_gap: u64,
    pub rlimit: u64,
    pub mmap_min_addr: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct FaultConfig {
    pub layout: FaultLayout,
    pub paging: PagingMode,
    /// Log a line for every user fault that ends in an unhandled signal.
    pub show_unhandled_signals: bool,
    pub quirks: CpuQuirks,
    pub stack: StackLimits,
    /// Page shift per huge page size index reported with poisoned pages.
    pub huge_page_shifts: [u8; 2],
}

impl FaultConfig {
    /// Shift for a hardware-poisoned huge page, falling back to the base page
    /// shift for unknown size indices.
    pub fn huge_page_shift(&self, index: usize) -> u8 {
        self.huge_page_shifts
            .get(index)
            .copied()
            .unwrap_or(faultline_abi::PAGE_SHIFT)
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            layout: DEFAULT_FAULT_LAYOUT,
            paging: PagingMode::FOUR_LEVEL,
            show_unhandled_signals: DEFAULT_SHOW_UNHANDLED_SIGNALS,
            quirks: CpuQuirks::default(),
            stack: StackLimits {
                guard_gap: DEFAULT_STACK_GUARD_GAP_PAGES * PAGE_SIZE_4KB,
                rlimit: DEFAULT_STACK_RLIMIT,
                mmap_min_addr: DEFAULT_MMAP_MIN_ADDR,
            },
            huge_page_shifts: [PMD_SHIFT, PUD_SHIFT],
        }
    }
}

pub fn config_from_cmdline(cmdline: Option<&str>) -> FaultConfig {
    let mut cfg = FaultConfig::default();
    let Some(cmdline) = cmdline else {
        return cfg;
    };
    for (key, value) in tokens(cmdline) {
        match key {
            "show_unhandled_signals" => {
                if let Some(show) = parse_bool(value) {
                    cfg.show_unhandled_signals = show;
                }
            }
            "stack_guard_gap" => {
                if let Some(pages) = parse_u64(value) {
                    cfg.stack.guard_gap = pages.saturating_mul(PAGE_SIZE_4KB);
                }
            }
            "stack_limit" => {
                if let Some(bytes) = parse_u64(value) {
                    cfg.stack.rlimit = bytes;
                }
            }
            "mmap_min_addr" => {
                if let Some(addr) = parse_u64(value) {
                    cfg.stack.mmap_min_addr = addr & !(PAGE_SIZE_4KB - 1);
                }
            }
            "la57" => match parse_bool(value) {
                Some(true) => {
                    cfg.layout = LA57_FAULT_LAYOUT;
                    cfg.paging = PagingMode::FIVE_LEVEL;
                }
                Some(false) => {
                    cfg.layout = DEFAULT_FAULT_LAYOUT;
                    cfg.paging = PagingMode::FOUR_LEVEL;
                }
                None => {}
            },
            "pf.k8_errata" => {
                if let Some(enabled) = parse_bool(value) {
                    cfg.quirks.amd_k8 = enabled;
                }
            }
            "pf.f00f_idt" => {
                cfg.quirks.f00f_idt_alias = parse_u64(value);
            }
            _ => {}
        }
    }
    cfg
}
