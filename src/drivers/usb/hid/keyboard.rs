//! HID 부트 프로토콜 키보드
//!
//! 8바이트 리포트: 수정자 비트필드 1바이트, 예약 1바이트, 키코드 6바이트.

use super::observer::ObserverRegistry;
use super::{ClassDriver, ClassDriverKind, HidEndpoint};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::xhci::ring::TransferRing;
use crate::drivers::usb::xhci::slot::SlotHandle;
use crate::memory::DmaBuffer;

/// 부트 키보드 리포트 크기
pub const KEYBOARD_REPORT_SIZE: usize = 8;

/// 수정자 키 비트필드
///
/// 정의되지 않은 비트는 없지만, 원시 값은 그대로 보존합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const LEFT_CTRL: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const LEFT_ALT: u8 = 1 << 2;
    pub const LEFT_GUI: u8 = 1 << 3;
    pub const RIGHT_CTRL: u8 = 1 << 4;
    pub const RIGHT_SHIFT: u8 = 1 << 5;
    pub const RIGHT_ALT: u8 = 1 << 6;
    pub const RIGHT_GUI: u8 = 1 << 7;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub const fn ctrl(self) -> bool {
        self.contains(Self::LEFT_CTRL | Self::RIGHT_CTRL)
    }

    pub const fn shift(self) -> bool {
        self.contains(Self::LEFT_SHIFT | Self::RIGHT_SHIFT)
    }

    pub const fn alt(self) -> bool {
        self.contains(Self::LEFT_ALT | Self::RIGHT_ALT)
    }

    pub const fn gui(self) -> bool {
        self.contains(Self::LEFT_GUI | Self::RIGHT_GUI)
    }
}

/// 디코딩된 부트 키보드 리포트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawKeyEvent {
    pub modifier: Modifiers,
    pub reserved: u8,
    /// 눌린 키의 HID Usage ID (빈 칸은 0)
    pub keys: [u8; 6],
}

impl RawKeyEvent {
    /// 리포트 바이트 디코딩
    ///
    /// 모든 바이트 패턴이 유효합니다. 8바이트보다 짧으면 나머지는 0으로 봅니다.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut report = [0u8; KEYBOARD_REPORT_SIZE];
        let n = raw.len().min(KEYBOARD_REPORT_SIZE);
        report[..n].copy_from_slice(&raw[..n]);

        let mut keys = [0u8; 6];
        keys.copy_from_slice(&report[2..8]);
        Self {
            modifier: Modifiers::from_bits(report[0]),
            reserved: report[1],
            keys,
        }
    }

    /// 첫 번째 키코드 칸
    pub fn key1(&self) -> u8 {
        self.keys[0]
    }

    /// 0이 아닌 키코드
    pub fn pressed_keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.keys.iter().copied().filter(|&key| key != 0)
    }

    /// 동시에 너무 많은 키가 눌림 (ErrorRollOver)
    pub fn is_rollover(&self) -> bool {
        self.keys.iter().all(|&key| key == 0x01)
    }
}

/// HID Usage ID를 US 배열 ASCII 문자로 변환
pub fn usage_to_ascii(usage: u8, shift: bool) -> Option<char> {
    const DIGITS: &[u8; 10] = b"1234567890";
    const DIGITS_SHIFTED: &[u8; 10] = b"!@#$%^&*()";
    const SYMBOLS: &[u8; 11] = b"-=[]\\#;'`,.";
    const SYMBOLS_SHIFTED: &[u8; 11] = b"_+{}|~:\"~<>";

    let ch = match usage {
        0x04..=0x1D => {
            let base = if shift { b'A' } else { b'a' };
            base + (usage - 0x04)
        }
        0x1E..=0x27 => {
            let table = if shift { DIGITS_SHIFTED } else { DIGITS };
            table[(usage - 0x1E) as usize]
        }
        0x28 => b'\n',
        0x2A => 0x08, // Backspace
        0x2B => b'\t',
        0x2C => b' ',
        0x2D..=0x37 => {
            let table = if shift { SYMBOLS_SHIFTED } else { SYMBOLS };
            table[(usage - 0x2D) as usize]
        }
        0x38 => {
            if shift {
                b'?'
            } else {
                b'/'
            }
        }
        _ => return None,
    };
    Some(ch as char)
}

/// 부트 키보드 클래스 드라이버
pub struct KeyboardDriver {
    endpoint: HidEndpoint,
    last_report: Option<RawKeyEvent>,
}

impl KeyboardDriver {
    pub fn new(slot: SlotHandle, interface_number: u8, dci: u8, max_packet_size: u16) -> Result<Self, UsbError> {
        Ok(Self {
            endpoint: HidEndpoint::new(slot, interface_number, dci, max_packet_size, KEYBOARD_REPORT_SIZE)?,
            last_report: None,
        })
    }

    /// 마지막으로 받은 리포트
    pub fn last_report(&self) -> Option<RawKeyEvent> {
        self.last_report
    }
}

impl ClassDriver for KeyboardDriver {
    fn kind(&self) -> ClassDriverKind {
        ClassDriverKind::Keyboard
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
        KEYBOARD_REPORT_SIZE
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
        let event = RawKeyEvent::from_bytes(raw);
        crate::log_trace!(
            "USB keyboard: mod={:#04x} keys={:02x?}",
            event.modifier.bits(),
            event.keys
        );
        observers.notify_keyboard(&event);
        self.last_report = Some(event);
        self.endpoint.arm(ring)
    }
}
