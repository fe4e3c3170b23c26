//! USB (Universal Serial Bus) 드라이버 모듈
//!
//! xHCI 호스트 컨트롤러를 통해 루트 허브 포트의 디바이스를 열거하고,
//! HID 부트 프로토콜 키보드/마우스의 입력을 옵저버에게 전달합니다.
//!
//! # 구성
//! - [`xhci`]: TRB, 링, 컨텍스트, 슬롯 관리, MMIO 레지스터
//! - [`enumeration`]: 포트별 열거 상태 머신
//! - [`hid`]: 클래스 드라이버와 옵저버
//! - [`core`]: 이벤트 루프 ([`UsbManager`])

pub mod core;
pub mod descriptor;
pub mod enumeration;
pub mod error;
pub mod hid;
pub mod host_controller;
pub mod request;
pub mod xhci;

pub use self::core::UsbManager;
pub use enumeration::EnumerationState;
pub use error::UsbError;
pub use host_controller::{PortSpeed, PortStatus, UsbHostController};

/// USB 클래스 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbClassCode {
    /// Human Interface Device (키보드, 마우스 등)
    Hid = 0x03,
    /// Mass Storage (USB 저장장치)
    MassStorage = 0x08,
    /// Hub (USB 허브)
    Hub = 0x09,
    /// Video (웹캠 등)
    Video = 0x0E,
    /// Audio (오디오 장치)
    Audio = 0x01,
    /// Unknown/Other
    Unknown = 0xFF,
}

impl From<u8> for UsbClassCode {
    fn from(code: u8) -> Self {
        match code {
            0x03 => UsbClassCode::Hid,
            0x08 => UsbClassCode::MassStorage,
            0x09 => UsbClassCode::Hub,
            0x0E => UsbClassCode::Video,
            0x01 => UsbClassCode::Audio,
            _ => UsbClassCode::Unknown,
        }
    }
}
