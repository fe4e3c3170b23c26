//! USB HID (Human Interface Device) 클래스 드라이버
//!
//! 부트 프로토콜 키보드/마우스의 Interrupt IN 리포트를 디코딩해 옵저버에게 넘깁니다.
//! 드라이버 종류는 닫힌 열거형([`HidClassDriver`])으로 표현하고,
//! 공통 동작은 [`ClassDriver`] 트레잇으로 노출합니다.

pub mod keyboard;
pub mod mouse;
pub mod observer;

pub use keyboard::{KeyboardDriver, Modifiers, RawKeyEvent};
pub use mouse::{MouseButtons, MouseDriver, MouseReport};
pub use observer::{KeyboardObserver, MouseObserver, ObserverRegistry};

use crate::drivers::usb::descriptor::InterfaceDescriptor;
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::xhci::ring::TransferRing;
use crate::drivers::usb::xhci::slot::{SlotHandle, SlotManager};
use crate::drivers::usb::xhci::trb::Trb;
use crate::drivers::usb::UsbClassCode;
use crate::memory::DmaBuffer;

/// HID 부트 프로토콜 코드
const PROTOCOL_KEYBOARD: u8 = 0x01;
const PROTOCOL_MOUSE: u8 = 0x02;

/// 가장 긴 부트 리포트 (키보드)
const MAX_REPORT_SIZE: usize = keyboard::KEYBOARD_REPORT_SIZE;

/// 리포트 버퍼 정렬
const REPORT_BUFFER_ALIGNMENT: usize = 64;

/// 클래스 드라이버 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDriverKind {
    Keyboard,
    Mouse,
}

impl ClassDriverKind {
    /// 드라이버가 기대하는 리포트 길이
    pub fn in_packet_size(self) -> usize {
        match self {
            ClassDriverKind::Keyboard => keyboard::KEYBOARD_REPORT_SIZE,
            ClassDriverKind::Mouse => mouse::MOUSE_REPORT_SIZE,
        }
    }
}

/// 인터페이스 디스크립터로 드라이버 종류 판별
///
/// 부수 효과가 없는 순수 함수입니다. HID 클래스의 프로토콜 코드만 봅니다.
pub fn recognize(interface: &InterfaceDescriptor) -> Option<ClassDriverKind> {
    if interface.class() != UsbClassCode::Hid {
        return None;
    }
    match interface.interface_protocol {
        PROTOCOL_KEYBOARD => Some(ClassDriverKind::Keyboard),
        PROTOCOL_MOUSE => Some(ClassDriverKind::Mouse),
        _ => None,
    }
}

/// 클래스 드라이버 공통 인터페이스
pub trait ClassDriver {
    fn kind(&self) -> ClassDriverKind;

    /// 바인딩된 디바이스 슬롯
    fn slot(&self) -> SlotHandle;

    fn interface_number(&self) -> u8;

    /// Interrupt IN 엔드포인트의 DCI
    fn endpoint_dci(&self) -> u8;

    /// `on_data_received`에 넘어오는 바이트 수
    fn in_packet_size(&self) -> usize;

    /// 컨트롤러가 리포트를 쓰는 버퍼
    fn report_buffer(&self) -> &DmaBuffer<u8>;

    /// 리포트 버퍼를 가리키는 Normal TRB를 링에 추가
    fn arm(&self, ring: &mut TransferRing) -> Result<u64, UsbError>;

    /// 완료된 Interrupt IN 전송 처리
    ///
    /// 리포트를 디코딩해 옵저버를 호출한 뒤 같은 버퍼로 링을 다시 무장합니다.
    fn on_data_received(
        &mut self,
        raw: &[u8],
        observers: &ObserverRegistry,
        ring: &mut TransferRing,
    ) -> Result<u64, UsbError>;
}

/// 드라이버가 소유하는 Interrupt IN 엔드포인트
pub struct HidEndpoint {
    slot: SlotHandle,
    interface_number: u8,
    dci: u8,
    /// Normal TRB 전송 길이
    transfer_length: u32,
    buffer: DmaBuffer<u8>,
}

impl HidEndpoint {
    fn new(
        slot: SlotHandle,
        interface_number: u8,
        dci: u8,
        max_packet_size: u16,
        report_size: usize,
    ) -> Result<Self, UsbError> {
        // 장치가 부트 리포트보다 긴 패킷을 보내도 babble이 나지 않게 MPS만큼 받음
        let length = (max_packet_size as usize).max(report_size);
        let buffer = DmaBuffer::<u8>::new_zeroed(length, REPORT_BUFFER_ALIGNMENT)?;
        Ok(Self {
            slot,
            interface_number,
            dci,
            transfer_length: length as u32,
            buffer,
        })
    }

    fn arm(&self, ring: &mut TransferRing) -> Result<u64, UsbError> {
        ring.enqueue(Trb::normal(
            self.buffer.phys_addr().as_u64(),
            self.transfer_length,
            true,
        ))
    }
}

/// HID 클래스 드라이버
pub enum HidClassDriver {
    Keyboard(KeyboardDriver),
    Mouse(MouseDriver),
}

impl HidClassDriver {
    /// 종류에 맞는 드라이버 생성
    pub fn new(
        kind: ClassDriverKind,
        slot: SlotHandle,
        interface_number: u8,
        dci: u8,
        max_packet_size: u16,
    ) -> Result<Self, UsbError> {
        Ok(match kind {
            ClassDriverKind::Keyboard => {
                HidClassDriver::Keyboard(KeyboardDriver::new(slot, interface_number, dci, max_packet_size)?)
            }
            ClassDriverKind::Mouse => {
                HidClassDriver::Mouse(MouseDriver::new(slot, interface_number, dci, max_packet_size)?)
            }
        })
    }

    fn inner(&self) -> &dyn ClassDriver {
        match self {
            HidClassDriver::Keyboard(driver) => driver,
            HidClassDriver::Mouse(driver) => driver,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ClassDriver {
        match self {
            HidClassDriver::Keyboard(driver) => driver,
            HidClassDriver::Mouse(driver) => driver,
        }
    }

    pub fn as_keyboard(&self) -> Option<&KeyboardDriver> {
        match self {
            HidClassDriver::Keyboard(driver) => Some(driver),
            _ => None,
        }
    }

    pub fn as_mouse(&self) -> Option<&MouseDriver> {
        match self {
            HidClassDriver::Mouse(driver) => Some(driver),
            _ => None,
        }
    }
}

impl ClassDriver for HidClassDriver {
    fn kind(&self) -> ClassDriverKind {
        self.inner().kind()
    }

    fn slot(&self) -> SlotHandle {
        self.inner().slot()
    }

    fn interface_number(&self) -> u8 {
        self.inner().interface_number()
    }

    fn endpoint_dci(&self) -> u8 {
        self.inner().endpoint_dci()
    }

    fn in_packet_size(&self) -> usize {
        self.inner().in_packet_size()
    }

    fn report_buffer(&self) -> &DmaBuffer<u8> {
        self.inner().report_buffer()
    }

    fn arm(&self, ring: &mut TransferRing) -> Result<u64, UsbError> {
        self.inner().arm(ring)
    }

    fn on_data_received(
        &mut self,
        raw: &[u8],
        observers: &ObserverRegistry,
        ring: &mut TransferRing,
    ) -> Result<u64, UsbError> {
        self.inner_mut().on_data_received(raw, observers, ring)
    }
}

/// 완료된 리포트를 드라이버에 전달
///
/// `received`는 컨트롤러가 실제로 쓴 바이트 수입니다. 그 뒤는 0으로 채워
/// 드라이버에는 항상 `in_packet_size` 바이트가 넘어갑니다.
///
/// 드라이버의 슬롯 핸들이 더 이상 유효하지 않으면 아무것도 하지 않고 `Ok(false)`입니다.
/// 전달하고 링을 다시 무장했으면 `Ok(true)`입니다.
pub fn dispatch<D: ClassDriver + ?Sized>(
    driver: &mut D,
    slots: &mut SlotManager,
    observers: &ObserverRegistry,
    received: usize,
) -> Result<bool, UsbError> {
    let dci = driver.endpoint_dci();
    let Some(slot) = slots.get_mut(driver.slot()) else {
        return Ok(false);
    };
    let ring = slot
        .transfer_ring_mut(dci)
        .ok_or(UsbError::NotInitialized)?;

    let len = driver.in_packet_size().min(MAX_REPORT_SIZE);
    let mut raw = [0u8; MAX_REPORT_SIZE];
    driver.report_buffer().copy_to(&mut raw[..received.min(len)]);
    driver.on_data_received(&raw[..len], observers, ring)?;
    Ok(true)
}
