//! Exception table: faulting kernel instruction addresses that have a
//! recovery path, mapped to the address execution resumes at.
//!
//! Entries are validated once at construction (strictly increasing,
//! therefore non-overlapping) so a lookup is a binary search.

use alloc::vec::Vec;
use core::fmt;

use faultline_lib::InterruptFrame;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// Address of the instruction that may fault.
    pub insn: u64,
    /// Address to resume at when it does.
    pub fixup: u64,
}

impl ExceptionTableEntry {
    pub const fn new(insn: u64, fixup: u64) -> Self {
        Self { insn, fixup }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtableError {
    /// Entry `index` does not sort strictly after its predecessor.
    Unsorted { index: usize },
    /// Two entries name the same instruction.
    Duplicate { insn: u64 },
}

impl fmt::Display for ExtableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsorted { index } => write!(f, "exception table unsorted at entry {}", index),
            Self::Duplicate { insn } => {
                write!(f, "exception table has two entries for {:#x}", insn)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExceptionTable {
    entries: Vec<ExceptionTableEntry>,
}

impl ExceptionTable {
    pub const fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Accept a table that is already sorted by instruction address.
    pub fn new(entries: Vec<ExceptionTableEntry>) -> Result<Self, ExtableError> {
        for (index, pair) in entries.windows(2).enumerate() {
            if pair[1].insn == pair[0].insn {
                return Err(ExtableError::Duplicate { insn: pair[1].insn });
            }
            if pair[1].insn < pair[0].insn {
                return Err(ExtableError::Unsorted { index: index + 1 });
            }
        }
        Ok(Self { entries })
    }

    /// Sort a table as emitted by the linker, then validate it.
    pub fn from_unsorted(mut entries: Vec<ExceptionTableEntry>) -> Result<Self, ExtableError> {
        entries.sort_unstable_by_key(|e| e.insn);
        Self::new(entries)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn search(&self, insn: u64) -> Option<u64> {
        self.entries
            .binary_search_by_key(&insn, |e| e.insn)
            .ok()
            .map(|i| self.entries[i].fixup)
    }

    /// Redirect `frame` to the fixup for its `rip`, if one exists.
    pub fn fixup_exception(&self, frame: &mut InterruptFrame) -> Option<u64> {
        let fixup = self.search(frame.rip)?;
        frame.rip = fixup;
        Some(fixup)
    }
}
