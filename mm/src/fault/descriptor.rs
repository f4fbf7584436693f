use faultline_abi::addr::VirtAddr;
use faultline_abi::fault::PageFaultCode;
use faultline_lib::InterruptFrame;

/// One page fault in flight.
///
/// `code` starts as the hardware error code and may be normalized before a
/// signal is delivered; `frame.rip` may be redirected by a fixup or an
/// erratum repair. Nothing else changes.
pub struct FaultContext<'f> {
    pub address: VirtAddr,
    pub code: PageFaultCode,
    pub frame: &'f mut InterruptFrame,
}

impl<'f> FaultContext<'f> {
    pub fn new(frame: &'f mut InterruptFrame, address: VirtAddr) -> Self {
        Self {
            address,
            code: PageFaultCode::from_raw(frame.error_code),
            frame,
        }
    }

    /// The interrupted context ran at CPL 3.
    #[inline]
    pub fn user_mode(&self) -> bool {
        self.frame.is_user_mode()
    }

    #[inline]
    pub fn irqs_were_enabled(&self) -> bool {
        self.frame.interrupts_were_enabled()
    }

    #[inline]
    pub fn ac_flag(&self) -> bool {
        self.frame.ac_set()
    }

    #[inline]
    pub fn rip(&self) -> u64 {
        self.frame.rip
    }
}
