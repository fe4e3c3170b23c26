//! HID 부트 프로토콜 마우스
//!
//! 3바이트 리포트: 버튼 비트필드, X 변위(i8), Y 변위(i8).
//! 휠 등 추가 바이트를 보내는 장치도 앞의 3바이트만 해석합니다.

use super::observer::ObserverRegistry;
use super::{ClassDriver, ClassDriverKind, HidEndpoint};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::xhci::ring::TransferRing;
use crate::drivers::usb::xhci::slot::SlotHandle;
use crate::memory::DmaBuffer;

/// 부트 마우스 리포트 크기
pub const MOUSE_REPORT_SIZE: usize = 3;

/// 마우스 버튼 비트필드 (원시 값 보존)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseButtons(u8);

impl MouseButtons {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const MIDDLE: u8 = 1 << 2;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn left(self) -> bool {
        self.0 & Self::LEFT != 0
    }

    pub const fn right(self) -> bool {
        self.0 & Self::RIGHT != 0
    }

    pub const fn middle(self) -> bool {
        self.0 & Self::MIDDLE != 0
    }
}

/// 디코딩된 부트 마우스 리포트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseReport {
    pub buttons: MouseButtons,
    pub dx: i8,
    pub dy: i8,
}

impl MouseReport {
    /// 리포트 바이트 디코딩 (짧으면 0으로 채움)
    pub fn from_bytes(raw: &[u8]) -> Self {
        let byte = |i: usize| raw.get(i).copied().unwrap_or(0);
        Self {
            buttons: MouseButtons::from_bits(byte(0)),
            dx: byte(1) as i8,
            dy: byte(2) as i8,
        }
    }
}

/// 부트 마우스 클래스 드라이버
pub struct MouseDriver {
    endpoint: HidEndpoint,
    /// 연결 이후 누적 위치
    position: (i32, i32),
}

impl MouseDriver {
    pub fn new(slot: SlotHandle, interface_number: u8, dci: u8, max_packet_size: u16) -> Result<Self, UsbError> {
        Ok(Self {
            endpoint: HidEndpoint::new(slot, interface_number, dci, max_packet_size, MOUSE_REPORT_SIZE)?,
            position: (0, 0),
        })
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }
}

impl ClassDriver for MouseDriver {
    fn kind(&self) -> ClassDriverKind {
        ClassDriverKind::Mouse
    }

    fn slot(&self) -> SlotHandle {
        self.endpoint.slot
    }

    fn interface_number(&self) -> u8 {
        self.endpoint.interface_number
    }

    fn endpoint_dci(&self) -> u8 {
        self.endpoint.dci
    }

    fn in_packet_size(&self) -> usize {
        MOUSE_REPORT_SIZE
    }

    fn report_buffer(&self) -> &DmaBuffer<u8> {
        &self.endpoint.buffer
    }

    fn arm(&self, ring: &mut TransferRing) -> Result<u64, UsbError> {
        self.endpoint.arm(ring)
    }

    fn on_data_received(
        &mut self,
        raw: &[u8],
        observers: &ObserverRegistry,
        ring: &mut TransferRing,
    ) -> Result<u64, UsbError> {
        let report = MouseReport::from_bytes(raw);
        self.position.0 += report.dx as i32;
        self.position.1 += report.dy as i32;
        observers.notify_mouse(&report);
        self.endpoint.arm(ring)
    }
}
