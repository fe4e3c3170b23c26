//! USB 에러 타입

use crate::drivers::usb::xhci::trb::CompletionCode;

/// USB 관련 에러
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// 링에 빈 슬롯이 없음 (호출자가 재시도하거나 명령을 버림)
    RingFull,
    /// 컨트롤러가 더 이상 슬롯 ID를 할당할 수 없음
    SlotAllocationFailed,
    /// 이미 활성 상태인 슬롯 ID가 다시 할당됨
    SlotAlreadyAllocated(u8),
    /// 존재하지 않는 슬롯
    SlotNotFound(u8),
    /// 컨트롤러가 실패 완료 코드를 보고함
    CommandCompletionError(CompletionCode),
    /// 인터페이스를 처리할 클래스 드라이버가 없음
    UnrecognizedInterface,
    /// 메모리 부족
    AllocationFailed,
    /// 잘못된 디스크립터
    InvalidDescriptor,
    /// 잘못된 파라미터
    InvalidParameter,
    /// 초기화되지 않음
    NotInitialized,
    /// 타임아웃
    Timeout,
    /// 디바이스를 찾을 수 없음
    DeviceNotFound,
    /// 호스트 컨트롤러 초기화 실패
    HostControllerInitFailed,
}

impl core::fmt::Display for UsbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UsbError::RingFull => write!(f, "TRB ring full"),
            UsbError::SlotAllocationFailed => write!(f, "No device slot available"),
            UsbError::SlotAlreadyAllocated(id) => write!(f, "Device slot {} already allocated", id),
            UsbError::SlotNotFound(id) => write!(f, "Device slot {} not found", id),
            UsbError::CommandCompletionError(code) => {
                write!(f, "Command completed with {:?} (code {})", code, code.as_u8())
            }
            UsbError::UnrecognizedInterface => write!(f, "No class driver for interface"),
            UsbError::AllocationFailed => write!(f, "USB out of memory"),
            UsbError::InvalidDescriptor => write!(f, "Invalid USB descriptor"),
            UsbError::InvalidParameter => write!(f, "Invalid USB parameter"),
            UsbError::NotInitialized => write!(f, "USB subsystem not initialized"),
            UsbError::Timeout => write!(f, "USB operation timeout"),
            UsbError::DeviceNotFound => write!(f, "USB device not found"),
            UsbError::HostControllerInitFailed => write!(f, "USB host controller initialization failed"),
        }
    }
}
