use faultline_abi::addr::VirtAddr;

use crate::memory_layout_defs::FaultLayout;

/// The legacy fixed-address vsyscall page. It sits in the kernel half but
/// is handled as a user address.
#[inline]
pub fn is_vsyscall_vaddr(layout: &FaultLayout, address: VirtAddr) -> bool {
    address.page_base().as_u64() == layout.vsyscall_addr
}

/// Route a fault to the kernel resolver (`true`) or the user resolver.
#[inline]
pub fn fault_in_kernel_space(layout: &FaultLayout, address: VirtAddr) -> bool {
    !is_vsyscall_vaddr(layout, address) && address.as_u64() >= layout.task_size_max
}
