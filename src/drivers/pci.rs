//! PCI (Peripheral Component Interconnect) 버스 관리
//!
//! 이 모듈은 PCI 버스를 스캔하여 xHCI 호스트 컨트롤러를 찾고,
//! MMIO 베이스 주소(BAR0/BAR1)를 해석합니다.

#[cfg(target_arch = "x86_64")]
use x86_64::instructions::port::Port;

/// PCI 구성 공간 포트
const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
const PCI_CONFIG_DATA: u16 = 0xCFC;

/// PCI 구성 공간 레지스터 오프셋
const PCI_VENDOR_ID: u8 = 0x00;
const PCI_COMMAND: u8 = 0x04;
const PCI_CLASS_CODE: u8 = 0x08;
const PCI_HEADER_TYPE: u8 = 0x0C;
const PCI_BAR0: u8 = 0x10;
const PCI_BAR1: u8 = 0x14;

/// PCI 헤더 타입
const PCI_HEADER_TYPE_DEVICE: u8 = 0x00;

/// Command 레지스터 비트
const PCI_COMMAND_MEMORY_SPACE: u32 = 1 << 1;
const PCI_COMMAND_BUS_MASTER: u32 = 1 << 2;

/// USB 호스트 컨트롤러 클래스 코드 (Serial Bus / USB / xHCI)
pub const PCI_CLASS_SERIAL_BUS: u8 = 0x0C;
pub const PCI_SUBCLASS_USB: u8 = 0x03;
pub const PCI_PROG_IF_XHCI: u8 = 0x30;

/// PCI 디바이스 정보
#[derive(Debug, Clone, Copy, Default)]
pub struct PciDevice {
    /// 버스 번호
    pub bus: u8,
    /// 디바이스 번호
    pub device: u8,
    /// 함수 번호
    pub function: u8,
    /// 벤더 ID
    pub vendor_id: u16,
    /// 디바이스 ID
    pub device_id: u16,
    /// 클래스 코드
    pub class_code: u8,
    /// 서브클래스
    pub subclass: u8,
    /// 프로그래밍 인터페이스
    pub prog_if: u8,
    /// 헤더 타입
    pub header_type: u8,
    /// BAR0 (베이스 주소 레지스터 0)
    pub bar0: u32,
    /// BAR1 (64비트 BAR의 상위 32비트)
    pub bar1: u32,
}

impl PciDevice {
    /// 버스/디바이스/함수 번호로 빈 디바이스 레코드 생성
    pub fn at(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
            ..Self::default()
        }
    }

    /// PCI 구성 공간 주소 생성
    pub fn config_address(&self, offset: u8) -> u32 {
        let enable_bit = 1 << 31;
        let bus_bits = (self.bus as u32) << 16;
        let device_bits = (self.device as u32) << 11;
        let function_bits = (self.function as u32) << 8;
        let offset_bits = (offset as u32) & 0xFC; // 하위 2비트는 0 (32비트 정렬)

        enable_bit | bus_bits | device_bits | function_bits | offset_bits
    }

    /// xHCI 컨트롤러인지 확인
    pub fn is_xhci(&self) -> bool {
        self.class_code == PCI_CLASS_SERIAL_BUS
            && self.subclass == PCI_SUBCLASS_USB
            && self.prog_if == PCI_PROG_IF_XHCI
    }

    /// MMIO 베이스 주소 해석
    ///
    /// I/O 공간 BAR이면 `None`을 반환합니다. 64비트 BAR은 BAR1을 상위 32비트로 사용합니다.
    pub fn mmio_base(&self) -> Option<u64> {
        if self.bar0 & 0x01 != 0 {
            return None;
        }
        let low = (self.bar0 & !0xF) as u64;
        let is_64bit = (self.bar0 >> 1) & 0x03 == 0x02;
        if is_64bit {
            Some(((self.bar1 as u64) << 32) | low)
        } else {
            Some(low)
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl PciDevice {
    /// PCI 구성 공간에서 32비트 레지스터 읽기
    ///
    /// # Safety
    /// 유효한 PCI 디바이스에 대한 접근이어야 합니다.
    pub unsafe fn read_config_register(&self, offset: u8) -> u32 {
        let mut address_port: Port<u32> = Port::new(PCI_CONFIG_ADDRESS);
        address_port.write(self.config_address(offset));

        let mut data_port: Port<u32> = Port::new(PCI_CONFIG_DATA);
        data_port.read()
    }

    /// PCI 구성 공간에 32비트 레지스터 쓰기
    ///
    /// # Safety
    /// 유효한 PCI 디바이스에 대한 접근이어야 합니다.
    pub unsafe fn write_config_register(&self, offset: u8, value: u32) {
        let mut address_port: Port<u32> = Port::new(PCI_CONFIG_ADDRESS);
        address_port.write(self.config_address(offset));

        let mut data_port: Port<u32> = Port::new(PCI_CONFIG_DATA);
        data_port.write(value);
    }

    /// 디바이스가 존재하는지 확인
    ///
    /// # Safety
    /// 유효한 PCI 버스/디바이스/함수 번호에 대한 접근이어야 합니다.
    pub unsafe fn exists(&self) -> bool {
        let vendor_id = self.read_config_register(PCI_VENDOR_ID) as u16;
        // 0xFFFF는 존재하지 않는 디바이스를 의미
        vendor_id != 0xFFFF
    }

    /// 디바이스 정보 읽기
    ///
    /// # Safety
    /// 유효한 PCI 디바이스에 대한 접근이어야 합니다.
    pub unsafe fn read_info(&mut self) {
        let vendor_device = self.read_config_register(PCI_VENDOR_ID);
        self.vendor_id = vendor_device as u16;
        self.device_id = (vendor_device >> 16) as u16;

        let class_revision = self.read_config_register(PCI_CLASS_CODE);
        self.class_code = ((class_revision >> 24) & 0xFF) as u8;
        self.subclass = ((class_revision >> 16) & 0xFF) as u8;
        self.prog_if = ((class_revision >> 8) & 0xFF) as u8;

        let header = self.read_config_register(PCI_HEADER_TYPE);
        self.header_type = ((header >> 16) & 0xFF) as u8;

        self.bar0 = self.read_config_register(PCI_BAR0);
        self.bar1 = self.read_config_register(PCI_BAR1);
    }

    /// 메모리 공간 접근과 버스 마스터(DMA) 활성화
    ///
    /// # Safety
    /// 유효한 PCI 디바이스에 대한 접근이어야 합니다.
    pub unsafe fn enable_bus_master(&self) {
        let command = self.read_config_register(PCI_COMMAND);
        self.write_config_register(
            PCI_COMMAND,
            command | PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER,
        );
    }
}

/// PCI 버스 스캔
///
/// 모든 PCI 버스를 스캔하여 디바이스를 찾고, 콜백 함수를 호출합니다.
/// 콜백이 true를 반환하면 스캔을 중단합니다.
///
/// # Safety
/// PCI 구성 공간 포트에 접근할 수 있어야 합니다.
#[cfg(target_arch = "x86_64")]
pub unsafe fn scan_pci_bus<F: FnMut(&PciDevice) -> bool>(mut callback: F) {
    for bus in 0..=255u8 {
        for device in 0..32u8 {
            let mut pci_device = PciDevice::at(bus, device, 0);
            if !pci_device.exists() {
                continue;
            }
            pci_device.read_info();

            if pci_device.header_type & 0x7F != PCI_HEADER_TYPE_DEVICE {
                continue;
            }

            if pci_device.header_type & 0x80 == 0 {
                if callback(&pci_device) {
                    return;
                }
                continue;
            }

            // 다중 함수 디바이스
            for function in 0..8u8 {
                let mut func_device = PciDevice::at(bus, device, function);
                if func_device.exists() {
                    func_device.read_info();
                    if callback(&func_device) {
                        return;
                    }
                }
            }
        }
    }
}

/// xHCI 호스트 컨트롤러 찾기
///
/// # Safety
/// PCI 구성 공간 포트에 접근할 수 있어야 합니다.
#[cfg(target_arch = "x86_64")]
pub unsafe fn find_xhci_controller() -> Option<PciDevice> {
    let mut found: Option<PciDevice> = None;

    scan_pci_bus(|device| {
        if device.is_xhci() {
            crate::log_info!(
                "Found xHCI controller at {:02x}:{:02x}.{} (Vendor=0x{:04X}, Device=0x{:04X})",
                device.bus,
                device.device,
                device.function,
                device.vendor_id,
                device.device_id
            );
            found = Some(*device);
            true
        } else {
            false
        }
    });

    found
}
