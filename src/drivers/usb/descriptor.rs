//! USB 디스크립터 구조
//!
//! USB 디바이스는 다양한 디스크립터를 통해 자신의 정보를 제공합니다.
//! 이 모듈은 제어 전송으로 받은 바이트열을 각 디스크립터의 길이 필드를 따라
//! 파싱합니다. 포인터 캐스트 없이 바이트 오프셋으로만 읽습니다.

use alloc::vec::Vec;

use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::UsbClassCode;

/// USB 디스크립터 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 0x01,
    Configuration = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    OtherSpeedConfiguration = 0x07,
    InterfacePower = 0x08,
    Hid = 0x21,
    Report = 0x22,
}

impl DescriptorType {
    pub fn from_raw(value: u8) -> Option<Self> {
        let ty = match value {
            0x01 => DescriptorType::Device,
            0x02 => DescriptorType::Configuration,
            0x03 => DescriptorType::String,
            0x04 => DescriptorType::Interface,
            0x05 => DescriptorType::Endpoint,
            0x06 => DescriptorType::DeviceQualifier,
            0x07 => DescriptorType::OtherSpeedConfiguration,
            0x08 => DescriptorType::InterfacePower,
            0x21 => DescriptorType::Hid,
            0x22 => DescriptorType::Report,
            _ => return None,
        };
        Some(ty)
    }
}

fn le16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// 길이와 타입 바이트 검사
fn check_header(bytes: &[u8], min_len: usize, ty: DescriptorType) -> Result<(), UsbError> {
    if bytes.len() < min_len || (bytes[0] as usize) < min_len || bytes[1] != ty as u8 {
        return Err(UsbError::InvalidDescriptor);
    }
    Ok(())
}

/// USB 디바이스 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// USB 버전 (BCD 형식, 예: 0x0200 = USB 2.0)
    pub usb_version: u16,
    /// 디바이스 클래스
    pub device_class: u8,
    /// 디바이스 서브클래스
    pub device_subclass: u8,
    /// 디바이스 프로토콜
    pub device_protocol: u8,
    /// 최대 패킷 크기 (Endpoint 0)
    pub max_packet_size: u8,
    /// 벤더 ID
    pub vendor_id: u16,
    /// 프로덕트 ID
    pub product_id: u16,
    /// 디바이스 버전 (BCD)
    pub device_version: u16,
    /// 제조사 문자열 인덱스
    pub manufacturer_string: u8,
    /// 제품 문자열 인덱스
    pub product_string: u8,
    /// 시리얼 번호 문자열 인덱스
    pub serial_string: u8,
    /// 구성 디스크립터 수
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// 디스크립터 길이 (18바이트)
    pub const LENGTH: usize = 18;
    /// bMaxPacketSize0까지의 앞부분 길이
    pub const HEADER_LENGTH: usize = 8;

    /// 앞 8바이트만으로 EP0 최대 패킷 크기 계산
    ///
    /// USB 3.x 디바이스는 bMaxPacketSize0를 2의 지수로 보고합니다.
    pub fn ep0_max_packet_size(bytes: &[u8]) -> Result<u16, UsbError> {
        check_header(bytes, Self::HEADER_LENGTH, DescriptorType::Device)?;
        let raw = bytes[7];
        let size = if le16(bytes, 2) >= 0x0300 {
            if raw > 15 {
                return Err(UsbError::InvalidDescriptor);
            }
            1u16 << raw
        } else {
            raw as u16
        };
        if size < 8 {
            return Err(UsbError::InvalidDescriptor);
        }
        Ok(size)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LENGTH, DescriptorType::Device)?;
        Ok(Self {
            usb_version: le16(bytes, 2),
            device_class: bytes[4],
            device_subclass: bytes[5],
            device_protocol: bytes[6],
            max_packet_size: bytes[7],
            vendor_id: le16(bytes, 8),
            product_id: le16(bytes, 10),
            device_version: le16(bytes, 12),
            manufacturer_string: bytes[14],
            product_string: bytes[15],
            serial_string: bytes[16],
            num_configurations: bytes[17],
        })
    }
}

/// USB 구성 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    /// 전체 구성 길이 (하위 디스크립터 포함)
    pub total_length: u16,
    /// 인터페이스 수
    pub num_interfaces: u8,
    /// 구성 값 (SET_CONFIGURATION 인자)
    pub configuration_value: u8,
    /// 구성 문자열 인덱스
    pub configuration_string: u8,
    /// 속성 (Self-powered, Remote wakeup 등)
    pub attributes: u8,
    /// 최대 전력 (2mA 단위)
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LENGTH, DescriptorType::Configuration)?;
        Ok(Self {
            total_length: le16(bytes, 2),
            num_interfaces: bytes[4],
            configuration_value: bytes[5],
            configuration_string: bytes[6],
            attributes: bytes[7],
            max_power: bytes[8],
        })
    }
}

/// USB 인터페이스 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// 인터페이스 번호
    pub interface_number: u8,
    /// 대체 설정
    pub alternate_setting: u8,
    /// 엔드포인트 수
    pub num_endpoints: u8,
    /// 인터페이스 클래스
    pub interface_class: u8,
    /// 인터페이스 서브클래스
    pub interface_subclass: u8,
    /// 인터페이스 프로토콜
    pub interface_protocol: u8,
    /// 인터페이스 문자열 인덱스
    pub interface_string: u8,
}

impl InterfaceDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LENGTH, DescriptorType::Interface)?;
        Ok(Self {
            interface_number: bytes[2],
            alternate_setting: bytes[3],
            num_endpoints: bytes[4],
            interface_class: bytes[5],
            interface_subclass: bytes[6],
            interface_protocol: bytes[7],
            interface_string: bytes[8],
        })
    }

    pub fn class(&self) -> UsbClassCode {
        UsbClassCode::from(self.interface_class)
    }
}

/// 엔드포인트 전송 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// USB 엔드포인트 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// 엔드포인트 주소 (비트 7: 방향, 비트 3-0: 엔드포인트 번호)
    pub endpoint_address: u8,
    /// 속성 (비트 1-0: 전송 타입)
    pub attributes: u8,
    /// 최대 패킷 크기
    pub max_packet_size: u16,
    /// 폴링 간격 (bInterval)
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const LENGTH: usize = 7;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LENGTH, DescriptorType::Endpoint)?;
        Ok(Self {
            endpoint_address: bytes[2],
            attributes: bytes[3],
            max_packet_size: le16(bytes, 4),
            interval: bytes[6],
        })
    }

    /// 엔드포인트 번호 추출
    pub fn endpoint_number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    /// 엔드포인트 방향 (true = IN, false = OUT)
    pub fn is_in(&self) -> bool {
        (self.endpoint_address & 0x80) != 0
    }

    /// 전송 타입 추출
    pub fn transfer_type(&self) -> EndpointTransferType {
        match self.attributes & 0x03 {
            0 => EndpointTransferType::Control,
            1 => EndpointTransferType::Isochronous,
            2 => EndpointTransferType::Bulk,
            _ => EndpointTransferType::Interrupt,
        }
    }

    /// 패킷 크기 필드 (비트 0-10)
    pub fn packet_size(&self) -> u16 {
        self.max_packet_size & 0x07FF
    }
}

/// HID 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidDescriptor {
    /// HID 버전 (BCD)
    pub hid_version: u16,
    pub country_code: u8,
    pub num_descriptors: u8,
    /// 첫 번째 클래스 디스크립터 타입 (보통 Report)
    pub report_descriptor_type: u8,
    pub report_descriptor_length: u16,
}

impl HidDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LENGTH, DescriptorType::Hid)?;
        Ok(Self {
            hid_version: le16(bytes, 2),
            country_code: bytes[4],
            num_descriptors: bytes[5],
            report_descriptor_type: bytes[6],
            report_descriptor_length: le16(bytes, 7),
        })
    }
}

/// 구성 블롭 안의 디스크립터 하나
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Configuration(ConfigurationDescriptor),
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
    Hid(HidDescriptor),
    /// 해석하지 않는 디스크립터
    Other { descriptor_type: u8, length: u8 },
}

/// 구성 디스크립터 블롭 순회
///
/// 각 디스크립터의 bLength를 따라 이동합니다. 길이가 0이거나 블롭을 넘으면
/// `InvalidDescriptor`를 한 번 내고 멈춥니다.
pub struct ConfigurationWalker<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> ConfigurationWalker<'a> {
    /// 블롭 앞의 구성 디스크립터 wTotalLength로 범위를 제한
    pub fn new(bytes: &'a [u8]) -> Self {
        let limit = match ConfigurationDescriptor::parse(bytes) {
            Ok(config) => (config.total_length as usize).min(bytes.len()),
            Err(_) => bytes.len(),
        };
        Self {
            bytes: &bytes[..limit],
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for ConfigurationWalker<'a> {
    type Item = Result<Descriptor, UsbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset + 2 > self.bytes.len() {
            return None;
        }

        let rest = &self.bytes[self.offset..];
        let length = rest[0] as usize;
        if length < 2 || length > rest.len() {
            self.failed = true;
            return Some(Err(UsbError::InvalidDescriptor));
        }
        let raw = &rest[..length];
        self.offset += length;

        let parsed = match DescriptorType::from_raw(raw[1]) {
            Some(DescriptorType::Configuration) => {
                ConfigurationDescriptor::parse(raw).map(Descriptor::Configuration)
            }
            Some(DescriptorType::Interface) => {
                InterfaceDescriptor::parse(raw).map(Descriptor::Interface)
            }
            Some(DescriptorType::Endpoint) => {
                EndpointDescriptor::parse(raw).map(Descriptor::Endpoint)
            }
            Some(DescriptorType::Hid) => HidDescriptor::parse(raw).map(Descriptor::Hid),
            _ => Ok(Descriptor::Other {
                descriptor_type: raw[1],
                length: raw[0],
            }),
        };
        if parsed.is_err() {
            self.failed = true;
        }
        Some(parsed)
    }
}

/// HID 부트 서브클래스
pub const HID_SUBCLASS_BOOT: u8 = 0x01;

/// HID 부트 인터페이스와 그 Interrupt IN 엔드포인트 찾기
///
/// 대체 설정 0만 봅니다. Interrupt IN 엔드포인트가 없는 인터페이스는 건너뜁니다.
pub fn find_hid_boot_interfaces(
    configuration: &[u8],
) -> Result<Vec<(InterfaceDescriptor, EndpointDescriptor)>, UsbError> {
    let mut found = Vec::new();
    let mut current: Option<InterfaceDescriptor> = None;

    for descriptor in ConfigurationWalker::new(configuration) {
        match descriptor? {
            Descriptor::Interface(interface) => {
                current = (interface.class() == UsbClassCode::Hid
                    && interface.interface_subclass == HID_SUBCLASS_BOOT
                    && interface.alternate_setting == 0)
                    .then_some(interface);
            }
            Descriptor::Endpoint(endpoint) => {
                if let Some(interface) = current {
                    if endpoint.is_in()
                        && endpoint.transfer_type() == EndpointTransferType::Interrupt
                    {
                        found.push((interface, endpoint));
                        current = None;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(found)
}
