//! Shared test scaffolding: a synthetic page-table arena and mock
//! collaborators for the fault pipeline.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use faultline_abi::addr::{PhysAddr, VirtAddr};
use faultline_abi::fault::PageFaultCode;
use faultline_abi::signal::FaultSigInfo;
use faultline_lib::klog::{KlogLevel, klog_register_backend, klog_set_level, klog_unregister_backend};
use faultline_lib::{DescriptorTables, InterruptFrame, RFLAGS_IF};
use spin::Mutex;

use crate::address_space::{AddressSpace, MmUsers, MmapReadGuard};
use crate::config::FaultConfig;
use crate::extable::{ExceptionTable, ExceptionTableEntry};
use crate::fault::env::{
    CpuFeatures, CpuOps, CurrentTask, FaultHooks, MemoryResolver, OomHandler, SignalSink,
    TaskFaultInfo,
};
use crate::fault::{FaultFlags, FaultHandler, FaultStats, VmFaultFlags};
use crate::paging::{PageTable, PageTableEntry, PageTableFrameMapping, PageTableLevel, PagingMode};
use crate::paging_defs::PageFlags;
use crate::registry::AddressSpaceRegistry;
use crate::vma_tree::VmaDesc;

// =============================================================================
// Synthetic page tables
// =============================================================================

/// Fake physical address of the first arena table.
const ARENA_BASE: u64 = 0x0100_0000;

/// Page tables on the host heap, addressed by fake physical addresses
/// `ARENA_BASE + i * 4K`. Anything outside the arena is unmappable.
pub struct SyntheticTables {
    frames: Mutex<Vec<*mut PageTable>>,
}

// SAFETY: the arena owns its tables; every access goes through volatile
// single-entry reads and writes like real paging structures.
unsafe impl Send for SyntheticTables {}
unsafe impl Sync for SyntheticTables {}

impl SyntheticTables {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn alloc(&self) -> PhysAddr {
        let mut frames = self.frames.lock();
        frames.push(Box::into_raw(Box::new(PageTable::new())));
        PhysAddr::new(ARENA_BASE + (frames.len() as u64 - 1) * 0x1000)
    }

    fn table(&self, phys: PhysAddr) -> *mut PageTable {
        self.phys_to_table_ptr(phys)
            .unwrap_or_else(|| panic!("{:#x} is not an arena table", phys.as_u64()))
    }

    pub fn entry(&self, table: PhysAddr, index: usize) -> PageTableEntry {
        // SAFETY: arena tables stay alive until drop; index checked by the caller.
        unsafe { PageTable::load_entry(self.table(table), index) }
    }

    pub fn set_entry(&self, table: PhysAddr, index: usize, entry: PageTableEntry) {
        // SAFETY: as in `entry`.
        unsafe { core::ptr::write_volatile(PageTable::entry_ptr(self.table(table), index), entry) }
    }

    /// Table at `level` on the path to `va`, creating missing intermediates.
    fn descend(
        &self,
        root: PhysAddr,
        mode: PagingMode,
        va: VirtAddr,
        level: PageTableLevel,
        table_flags: PageFlags,
    ) -> PhysAddr {
        let mut table = root;
        let mut current = mode.top();
        while current != level {
            let index = current.index_of(va);
            let mut entry = self.entry(table, index);
            if !entry.is_present() {
                entry = PageTableEntry::new(self.alloc(), table_flags);
                self.set_entry(table, index, entry);
            }
            table = entry.address();
            current = current.next_lower().expect("level below top");
        }
        table
    }

    fn table_flags(leaf: PageFlags) -> PageFlags {
        if leaf.contains(PageFlags::USER) {
            PageFlags::USER_TABLE
        } else {
            PageFlags::KERNEL_TABLE
        }
    }

    pub fn map_4k(
        &self,
        root: PhysAddr,
        mode: PagingMode,
        va: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) {
        self.map_large(root, mode, PageTableLevel::One, va, phys, flags - PageFlags::HUGE);
    }

    /// Map a large page at `level`; `HUGE` is added except at the last level.
    pub fn map_large(
        &self,
        root: PhysAddr,
        mode: PagingMode,
        level: PageTableLevel,
        va: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) {
        let table = self.descend(root, mode, va, level, Self::table_flags(flags));
        let flags = if level == PageTableLevel::One {
            flags
        } else {
            flags | PageFlags::HUGE
        };
        self.set_entry(table, level.index_of(va), PageTableEntry::new(phys, flags));
    }

    /// Rewrite the entry at `level` on the path to `va`.
    pub fn update_entry(
        &self,
        root: PhysAddr,
        mode: PagingMode,
        level: PageTableLevel,
        va: VirtAddr,
        f: impl FnOnce(PageTableEntry) -> PageTableEntry,
    ) {
        let table = self.descend(root, mode, va, level, PageFlags::KERNEL_TABLE);
        let index = level.index_of(va);
        self.set_entry(table, index, f(self.entry(table, index)));
    }
}

unsafe impl PageTableFrameMapping for SyntheticTables {
    fn phys_to_table_ptr(&self, phys: PhysAddr) -> Option<*mut PageTable> {
        let offset = phys.as_u64().checked_sub(ARENA_BASE)?;
        if offset % 0x1000 != 0 {
            return None;
        }
        self.frames.lock().get((offset / 0x1000) as usize).copied()
    }
}

impl Drop for SyntheticTables {
    fn drop(&mut self) {
        for table in self.frames.get_mut().drain(..) {
            // SAFETY: each pointer came from `Box::into_raw` in `alloc`.
            drop(unsafe { Box::from_raw(table) });
        }
    }
}

// =============================================================================
// Collaborators
// =============================================================================

#[derive(Default)]
pub struct RecordingSignals {
    sent: Mutex<Vec<FaultSigInfo>>,
}

impl RecordingSignals {
    pub fn delivered(&self) -> Vec<FaultSigInfo> {
        self.sent.lock().clone()
    }
}

impl SignalSink for RecordingSignals {
    fn force_sig_fault(&self, info: &FaultSigInfo) {
        self.sent.lock().push(*info);
    }
}

/// Returns its script one entry per call, repeating the last entry.
#[derive(Default)]
pub struct ScriptedResolver {
    script: Mutex<Vec<VmFaultFlags>>,
    next: AtomicUsize,
    calls: AtomicUsize,
    flags: Mutex<Vec<FaultFlags>>,
}

impl ScriptedResolver {
    pub fn script(&self, results: &[VmFaultFlags]) {
        *self.script.lock() = results.to_vec();
        self.next.store(0, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn flags_seen(&self) -> Vec<FaultFlags> {
        self.flags.lock().clone()
    }
}

impl MemoryResolver for ScriptedResolver {
    fn handle_mm_fault(
        &self,
        _mm: &AddressSpace,
        vma: &VmaDesc,
        address: VirtAddr,
        flags: FaultFlags,
        lock: &mut MmapReadGuard<'_>,
    ) -> VmFaultFlags {
        assert!(lock.is_locked(), "resolver entered without the mmap lock");
        assert!(vma.contains(address.as_u64()));
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.flags.lock().push(flags);

        let script = self.script.lock();
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        let result = script
            .get(i)
            .or(script.last())
            .copied()
            .unwrap_or(VmFaultFlags::empty());
        if result.contains(VmFaultFlags::RETRY) {
            lock.unlock();
        }
        result
    }
}

#[derive(Default)]
pub struct CountingOom {
    calls: AtomicUsize,
}

impl CountingOom {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl OomHandler for CountingOom {
    fn pagefault_out_of_memory(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct MockHooks {
    pub async_pf: bool,
    pub mmiotrace: bool,
    pub kprobe: bool,
    pub emulate_vsyscall: bool,
}

impl FaultHooks for MockHooks {
    fn async_page_fault(&self, _: &InterruptFrame, _: PageFaultCode, _: VirtAddr) -> bool {
        self.async_pf
    }

    fn mmiotrace(&self, _: &InterruptFrame, _: VirtAddr) -> bool {
        self.mmiotrace
    }

    fn kprobe(&self, _: &InterruptFrame) -> bool {
        self.kprobe
    }

    fn emulate_vsyscall(&self, _: &mut InterruptFrame, _: PageFaultCode, _: VirtAddr) -> bool {
        self.emulate_vsyscall
    }
}

#[derive(Default)]
pub struct MockTask {
    pub mm: Option<MmUsers>,
    pub in_interrupt: bool,
    pub sig_on_uaccess_err: bool,
    pub handlers_disabled: bool,
    pub signal_pending: bool,
    /// A fatal signal shows up once it has been asked about this many times.
    pub fatal_after: Option<usize>,
    fatal_queries: AtomicUsize,
    pub kernel_stack: Option<Range<u64>>,
    pub stack_end_corrupted: bool,
    fault_info: Mutex<Option<TaskFaultInfo>>,
}

impl MockTask {
    pub fn fault_info(&self) -> Option<TaskFaultInfo> {
        *self.fault_info.lock()
    }
}

impl CurrentTask for MockTask {
    fn mm(&self) -> Option<&AddressSpace> {
        self.mm.as_ref().map(|users| users.arc().as_ref())
    }

    fn faulthandler_disabled(&self) -> bool {
        self.handlers_disabled
    }

    fn in_interrupt(&self) -> bool {
        self.in_interrupt
    }

    fn signal_pending(&self) -> bool {
        self.signal_pending
    }

    fn fatal_signal_pending(&self) -> bool {
        let asked = self.fatal_queries.fetch_add(1, Ordering::Relaxed);
        self.fatal_after.is_some_and(|limit| asked >= limit)
    }

    fn sig_on_uaccess_err(&self) -> bool {
        self.sig_on_uaccess_err
    }

    fn set_fault_info(&self, info: TaskFaultInfo) {
        *self.fault_info.lock() = Some(info);
    }

    fn kernel_stack(&self) -> Option<Range<u64>> {
        self.kernel_stack.clone()
    }

    fn stack_end_corrupted(&self) -> bool {
        self.stack_end_corrupted
    }

    fn pid(&self) -> u32 {
        42
    }

    fn comm(&self) -> &str {
        "faulty"
    }
}

/// CPU with a byte-addressed memory image for nofault reads.
pub struct MockCpu {
    pub root: PhysAddr,
    pub features: CpuFeatures,
    pub pkru: u32,
    pub tables: Option<DescriptorTables>,
    memory: Mutex<BTreeMap<u64, u8>>,
    irqs: AtomicBool,
    deaths: AtomicUsize,
}

impl MockCpu {
    pub fn new() -> Self {
        Self {
            root: PhysAddr::NULL,
            features: CpuFeatures::default(),
            pkru: 0,
            tables: None,
            memory: Mutex::new(BTreeMap::new()),
            irqs: AtomicBool::new(false),
            deaths: AtomicUsize::new(0),
        }
    }

    pub fn poke(&self, address: u64, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        for (i, byte) in bytes.iter().enumerate() {
            memory.insert(address + i as u64, *byte);
        }
    }

    pub fn irqs_enabled(&self) -> bool {
        self.irqs.load(Ordering::Relaxed)
    }

    pub fn deaths(&self) -> usize {
        self.deaths.load(Ordering::Relaxed)
    }
}

impl CpuOps for MockCpu {
    fn local_irq_enable(&self) {
        self.irqs.store(true, Ordering::Relaxed);
    }

    fn local_irq_disable(&self) {
        self.irqs.store(false, Ordering::Relaxed);
    }

    fn current_root(&self) -> PhysAddr {
        self.root
    }

    fn read_byte_nofault(&self, address: u64, _user: bool) -> Option<u8> {
        self.memory.lock().get(&address).copied()
    }

    fn descriptor_tables(&self) -> Option<DescriptorTables> {
        self.tables
    }

    fn features(&self) -> CpuFeatures {
        self.features
    }

    fn pkru(&self) -> u32 {
        self.pkru
    }

    fn die(&self, _reason: &str, _frame: &InterruptFrame, _code: PageFaultCode) {
        self.deaths.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Frames
// =============================================================================

pub fn user_frame(code: PageFaultCode) -> InterruptFrame {
    InterruptFrame {
        vector: 14,
        error_code: code.bits(),
        rip: 0x40_1000,
        cs: 0x33,
        rflags: RFLAGS_IF,
        rsp: 0x7fff_ffff_e000,
        ss: 0x2b,
        ..Default::default()
    }
}

pub fn kernel_frame(code: PageFaultCode, rip: u64) -> InterruptFrame {
    InterruptFrame {
        vector: 14,
        error_code: code.bits(),
        rip,
        cs: 0x10,
        rflags: RFLAGS_IF,
        rsp: 0xffff_c900_0000_7f00,
        ss: 0x18,
        ..Default::default()
    }
}

// =============================================================================
// Log capture
// =============================================================================

static CAPTURE_SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());
static CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn capture_backend(args: fmt::Arguments<'_>) {
    CAPTURED.lock().push(std::format!("{}", args));
}

/// Routes klog into a buffer until [`LogCapture::finish`]. Captures are
/// serialized; lines from tests running alongside may also land in it.
pub struct LogCapture {
    _serial: std::sync::MutexGuard<'static, ()>,
}

impl LogCapture {
    pub fn start() -> Self {
        let serial = CAPTURE_SERIAL
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        CAPTURED.lock().clear();
        klog_set_level(KlogLevel::Info);
        klog_register_backend(capture_backend);
        Self { _serial: serial }
    }

    pub fn finish(self) -> Vec<String> {
        klog_unregister_backend();
        core::mem::take(&mut *CAPTURED.lock())
    }
}

// =============================================================================
// Handler harness
// =============================================================================

/// One user address space over synthetic tables, plus a mock for every
/// collaborator. `handler()` borrows all of it.
pub struct Harness {
    pub config: FaultConfig,
    pub tables: SyntheticTables,
    pub kernel_root: PhysAddr,
    pub user_root: PhysAddr,
    pub registry: AddressSpaceRegistry,
    pub extable: ExceptionTable,
    pub task: MockTask,
    pub cpu: MockCpu,
    pub resolver: ScriptedResolver,
    pub signals: RecordingSignals,
    pub oom: CountingOom,
    pub hooks: MockHooks,
    pub stats: FaultStats,
}

impl Harness {
    pub fn new() -> Self {
        let tables = SyntheticTables::new();
        let kernel_root = tables.alloc();
        let user_root = tables.alloc();
        let registry = AddressSpaceRegistry::new(kernel_root);
        let mm = registry.create(user_root);
        let mut cpu = MockCpu::new();
        cpu.root = user_root;
        Self {
            config: FaultConfig::default(),
            tables,
            kernel_root,
            user_root,
            registry,
            extable: ExceptionTable::empty(),
            task: MockTask {
                mm: Some(mm),
                ..MockTask::default()
            },
            cpu,
            resolver: ScriptedResolver::default(),
            signals: RecordingSignals::default(),
            oom: CountingOom::default(),
            hooks: MockHooks::default(),
            stats: FaultStats::new(),
        }
    }

    pub fn with_fixup(mut self, insn: u64, fixup: u64) -> Self {
        self.extable = ExceptionTable::new(vec![ExceptionTableEntry::new(insn, fixup)])
            .expect("single entry table");
        self
    }

    pub fn mm(&self) -> &MmUsers {
        self.task.mm.as_ref().expect("harness task has an mm")
    }

    pub fn handler(&self) -> FaultHandler<'_> {
        FaultHandler {
            config: &self.config,
            registry: &self.registry,
            mapping: &self.tables,
            extable: &self.extable,
            task: &self.task,
            cpu: &self.cpu,
            resolver: &self.resolver,
            signals: &self.signals,
            oom: &self.oom,
            hooks: &self.hooks,
            stats: &self.stats,
        }
    }
}
