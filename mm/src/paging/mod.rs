pub mod page_table_defs;
pub mod walker;

pub use page_table_defs::{PageTable, PageTableEntry, PageTableLevel};
pub use walker::{
    ChainEnd, ChainLink, HhdmMapping, PageTableFrameMapping, PageTableWalker, PagingMode,
    TopSync, TranslationChain, WalkResult,
};
