//! USB 제어 요청 (Setup 패킷)
//!
//! 표준 요청과 HID 클래스 요청의 8바이트 Setup 패킷을 만듭니다.

use crate::drivers::usb::descriptor::DescriptorType;

/// bmRequestType 방향 비트
const DIRECTION_DEVICE_TO_HOST: u8 = 0x80;
/// bmRequestType 타입 필드
const TYPE_STANDARD: u8 = 0x00;
const TYPE_CLASS: u8 = 0x20;
/// bmRequestType 수신자 필드
const RECIPIENT_DEVICE: u8 = 0x00;
const RECIPIENT_INTERFACE: u8 = 0x01;

/// USB 표준 요청 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
}

/// HID 클래스 요청 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidRequest {
    GetReport = 0x01,
    GetIdle = 0x02,
    GetProtocol = 0x03,
    SetReport = 0x09,
    SetIdle = 0x0A,
    SetProtocol = 0x0B,
}

/// HID 프로토콜 (SET_PROTOCOL wValue)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidProtocol {
    Boot = 0,
    Report = 1,
}

/// Setup 패킷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// GET_DESCRIPTOR 요청
    pub fn get_descriptor(descriptor_type: DescriptorType, descriptor_index: u8, length: u16) -> Self {
        Self {
            request_type: DIRECTION_DEVICE_TO_HOST | TYPE_STANDARD | RECIPIENT_DEVICE,
            request: StandardRequest::GetDescriptor as u8,
            value: ((descriptor_type as u16) << 8) | descriptor_index as u16,
            index: 0,
            length,
        }
    }

    /// SET_CONFIGURATION 요청
    pub fn set_configuration(configuration_value: u8) -> Self {
        Self {
            request_type: TYPE_STANDARD | RECIPIENT_DEVICE,
            request: StandardRequest::SetConfiguration as u8,
            value: configuration_value as u16,
            index: 0,
            length: 0,
        }
    }

    /// HID SET_PROTOCOL 요청
    pub fn set_protocol(interface_number: u8, protocol: HidProtocol) -> Self {
        Self {
            request_type: TYPE_CLASS | RECIPIENT_INTERFACE,
            request: HidRequest::SetProtocol as u8,
            value: protocol as u16,
            index: interface_number as u16,
            length: 0,
        }
    }

    /// HID GET_REPORT 요청 (wValue 상위 바이트 = 리포트 타입, 하위 = 리포트 ID)
    pub fn get_report(interface_number: u8, report_type: u8, report_id: u8, length: u16) -> Self {
        Self {
            request_type: DIRECTION_DEVICE_TO_HOST | TYPE_CLASS | RECIPIENT_INTERFACE,
            request: HidRequest::GetReport as u8,
            value: ((report_type as u16) << 8) | report_id as u16,
            index: interface_number as u16,
            length,
        }
    }

    /// 디바이스 → 호스트 방향인지
    pub fn is_device_to_host(&self) -> bool {
        self.request_type & DIRECTION_DEVICE_TO_HOST != 0
    }

    /// 와이어 형식 (little-endian 8바이트)
    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}
