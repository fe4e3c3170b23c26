//! xHCI MMIO 레지스터
//!
//! Capability / Operational / Runtime / Doorbell 레지스터 공간에 접근하고
//! 컨트롤러 리셋 및 시작 순서를 수행합니다.
//!
//! # 참고 자료
//! - xHCI Specification Revision 1.2, 5장

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{fence, Ordering};

use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::host_controller::{PortSpeed, PortStatus, UsbHostController};

/// Capability 레지스터 오프셋
const CAPLENGTH: u64 = 0x00;
const HCSPARAMS1: u64 = 0x04;
const HCSPARAMS2: u64 = 0x08;
const DBOFF: u64 = 0x14;
const RTSOFF: u64 = 0x18;

/// Operational 레지스터 오프셋 (CAPLENGTH 이후)
const USBCMD: u64 = 0x00;
const USBSTS: u64 = 0x04;
const CRCR: u64 = 0x18;
const DCBAAP: u64 = 0x30;
const CONFIG: u64 = 0x38;
const PORTSC_BASE: u64 = 0x400; // 포트별 0x10 간격

/// Interrupter 0 레지스터 (Runtime 베이스 + 0x20)
const INTERRUPTER_0: u64 = 0x20;
const IMAN: u64 = 0x00;
const IMOD: u64 = 0x04;
const ERSTSZ: u64 = 0x08;
const ERSTBA: u64 = 0x10;
const ERDP: u64 = 0x18;

/// USBCMD 비트
const CMD_RUN: u32 = 1 << 0;
const CMD_HCRST: u32 = 1 << 1;

/// USBSTS 비트
const STS_HCH: u32 = 1 << 0; // Halted
const STS_HSE: u32 = 1 << 2; // Host System Error
const STS_CNR: u32 = 1 << 11; // Controller Not Ready

/// PORTSC 비트
const PORTSC_CCS: u32 = 1 << 0;
const PORTSC_PED: u32 = 1 << 1;
const PORTSC_PR: u32 = 1 << 4;
const PORTSC_SPEED_SHIFT: u32 = 10;
const PORTSC_SPEED_MASK: u32 = 0xF << PORTSC_SPEED_SHIFT;
/// RW1C 변경 비트 (CSC, PEC, WRC, OCC, PRC, PLC, CEC)
const PORTSC_CHANGE_BITS: u32 = 0x00FE_0000;
/// 쓰기 시 유지해야 하는 RW 비트 (PP, PIC, WCE, WDE, WOE 등)
const PORTSC_PRESERVE: u32 = 0x0E00_C3E0;

/// ERDP Event Handler Busy (RW1C)
const ERDP_EHB: u64 = 1 << 3;
/// IMAN Interrupt Pending (RW1C)
const IMAN_IP: u32 = 1 << 0;

/// 대기 루프 한도
const SPIN_LIMIT: u32 = 100_000;

/// PORTSC 값 해석
pub fn decode_portsc(portsc: u32) -> PortStatus {
    PortStatus {
        connected: portsc & PORTSC_CCS != 0,
        enabled: portsc & PORTSC_PED != 0,
        reset_in_progress: portsc & PORTSC_PR != 0,
        speed: PortSpeed::from_raw(((portsc & PORTSC_SPEED_MASK) >> PORTSC_SPEED_SHIFT) as u8),
    }
}

/// 현재 PORTSC 값에 `set` 비트를 더한 쓰기 값
///
/// PED(RW1C, 1을 쓰면 포트가 꺼짐)와 변경 비트는 `set`에 명시한 것만 씁니다.
pub fn portsc_write_value(current: u32, set: u32) -> u32 {
    (current & PORTSC_PRESERVE) | set
}

/// xHCI MMIO 레지스터 집합
pub struct XhciRegisters {
    /// MMIO 베이스 (가상 주소)
    mmio_base: u64,
    /// Operational 레지스터 베이스
    op_base: u64,
    /// Runtime 레지스터 베이스
    runtime_base: u64,
    /// Doorbell 배열 베이스
    doorbell_base: u64,
    /// 루트 허브 포트 수
    port_count: u8,
    /// 지원하는 최대 디바이스 슬롯 수
    max_slots: u8,
    /// 필요한 스크래치패드 버퍼 수
    max_scratchpad: u16,
}

impl XhciRegisters {
    /// Capability 레지스터를 읽어 레지스터 공간 배치 계산
    ///
    /// # Safety
    /// `mmio_base`는 컨트롤러 BAR가 매핑된 가상 주소여야 합니다.
    pub unsafe fn new(mmio_base: u64) -> Self {
        let read_cap = |offset: u64| read_volatile((mmio_base + offset) as *const u32);

        let cap_length = (read_cap(CAPLENGTH) & 0xFF) as u64;
        let hcsparams1 = read_cap(HCSPARAMS1);
        let hcsparams2 = read_cap(HCSPARAMS2);
        let dboff = (read_cap(DBOFF) & !0x3) as u64;
        let rtsoff = (read_cap(RTSOFF) & !0x1F) as u64;

        let scratchpad_hi = (hcsparams2 >> 21) & 0x1F;
        let scratchpad_lo = (hcsparams2 >> 27) & 0x1F;

        let regs = Self {
            mmio_base,
            op_base: mmio_base + cap_length,
            runtime_base: mmio_base + rtsoff,
            doorbell_base: mmio_base + dboff,
            port_count: (hcsparams1 >> 24) as u8,
            max_slots: (hcsparams1 & 0xFF) as u8,
            max_scratchpad: ((scratchpad_hi << 5) | scratchpad_lo) as u16,
        };

        crate::log_info!(
            "xHCI: CAPLENGTH={}, OPS={:#X}, RTS={:#X}, DB={:#X}, Ports={}, Slots={}",
            cap_length,
            regs.op_base,
            regs.runtime_base,
            regs.doorbell_base,
            regs.port_count,
            regs.max_slots
        );
        regs
    }

    unsafe fn read_u32(&self, addr: u64) -> u32 {
        read_volatile(addr as *const u32)
    }

    unsafe fn write_u32(&self, addr: u64, value: u32) {
        write_volatile(addr as *mut u32, value);
    }

    unsafe fn write_u64(&self, addr: u64, value: u64) {
        self.write_u32(addr, value as u32);
        self.write_u32(addr + 4, (value >> 32) as u32);
    }

    unsafe fn read_op(&self, offset: u64) -> u32 {
        self.read_u32(self.op_base + offset)
    }

    unsafe fn write_op(&self, offset: u64, value: u32) {
        self.write_u32(self.op_base + offset, value);
    }

    fn portsc_addr(&self, port: u8) -> Option<u64> {
        if port == 0 || port > self.port_count {
            return None;
        }
        Some(self.op_base + PORTSC_BASE + (port as u64 - 1) * 0x10)
    }

    fn interrupter(&self, offset: u64) -> u64 {
        self.runtime_base + INTERRUPTER_0 + offset
    }

    unsafe fn wait_while(&self, offset: u64, mask: u32) -> Result<(), UsbError> {
        let mut spins = SPIN_LIMIT;
        while self.read_op(offset) & mask != 0 {
            spins = spins.checked_sub(1).ok_or(UsbError::Timeout)?;
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// MMIO 베이스 주소
    pub fn mmio_base(&self) -> u64 {
        self.mmio_base
    }

    /// 컨트롤러가 지원하는 최대 슬롯 수 (HCSPARAMS1.MaxSlots)
    pub fn max_device_slots(&self) -> u8 {
        self.max_slots
    }

    /// 컨트롤러 정지 후 리셋
    ///
    /// # Safety
    /// 다른 코드가 컨트롤러를 사용 중이 아니어야 합니다.
    pub unsafe fn reset(&mut self) -> Result<(), UsbError> {
        let usbcmd = self.read_op(USBCMD);
        self.write_op(USBCMD, usbcmd & !CMD_RUN);
        let mut spins = SPIN_LIMIT;
        while self.read_op(USBSTS) & STS_HCH == 0 {
            spins = spins.checked_sub(1).ok_or(UsbError::HostControllerInitFailed)?;
            core::hint::spin_loop();
        }

        self.write_op(USBCMD, CMD_HCRST);
        self.wait_while(USBCMD, CMD_HCRST)
            .map_err(|_| UsbError::HostControllerInitFailed)?;
        self.wait_while(USBSTS, STS_CNR)
            .map_err(|_| UsbError::HostControllerInitFailed)?;

        crate::log_debug!("xHCI: controller reset complete");
        Ok(())
    }

    /// DCBAA, Command Ring, Interrupter 0을 설정하고 컨트롤러 시작
    ///
    /// # Safety
    /// 전달한 물리 주소의 구조체들은 컨트롤러가 동작하는 동안 유지되어야 합니다.
    pub unsafe fn start(
        &mut self,
        enabled_slots: u8,
        dcbaa_phys: u64,
        command_ring_pointer: u64,
        erst_phys: u64,
        erst_size: u32,
        event_dequeue: u64,
    ) -> Result<(), UsbError> {
        let config = self.read_op(CONFIG);
        self.write_op(CONFIG, (config & !0xFF) | enabled_slots as u32);

        self.write_u64(self.op_base + DCBAAP, dcbaa_phys);
        // CRCR: 링 주소 | RCS
        self.write_u64(self.op_base + CRCR, command_ring_pointer);

        // Interrupter 0: ERSTSZ를 먼저, ERSTBA를 마지막에 씀
        self.write_u32(self.interrupter(ERSTSZ), erst_size);
        self.write_u64(self.interrupter(ERDP), event_dequeue);
        self.write_u64(self.interrupter(ERSTBA), erst_phys);
        self.write_u32(self.interrupter(IMOD), 4000);
        self.write_u32(self.interrupter(IMAN), IMAN_IP);

        fence(Ordering::SeqCst);
        let usbcmd = self.read_op(USBCMD);
        self.write_op(USBCMD, usbcmd | CMD_RUN);

        let mut spins = SPIN_LIMIT;
        while self.read_op(USBSTS) & STS_HCH != 0 {
            spins = spins.checked_sub(1).ok_or(UsbError::HostControllerInitFailed)?;
            core::hint::spin_loop();
        }
        if self.read_op(USBSTS) & STS_HSE != 0 {
            return Err(UsbError::HostControllerInitFailed);
        }

        crate::log_info!("xHCI: controller running ({} slots enabled)", enabled_slots);
        Ok(())
    }
}

impl UsbHostController for XhciRegisters {
    fn port_count(&self) -> u8 {
        self.port_count
    }

    fn port_status(&self, port: u8) -> PortStatus {
        match self.portsc_addr(port) {
            // SAFETY: 포트 범위가 확인된 PORTSC 레지스터입니다.
            Some(addr) => decode_portsc(unsafe { self.read_u32(addr) }),
            None => PortStatus::default(),
        }
    }

    fn reset_port(&mut self, port: u8) {
        if let Some(addr) = self.portsc_addr(port) {
            // SAFETY: 포트 범위가 확인된 PORTSC 레지스터입니다.
            unsafe {
                let current = self.read_u32(addr);
                self.write_u32(addr, portsc_write_value(current, PORTSC_PR));
            }
        }
    }

    fn clear_port_change(&mut self, port: u8) {
        if let Some(addr) = self.portsc_addr(port) {
            // SAFETY: 포트 범위가 확인된 PORTSC 레지스터입니다.
            unsafe {
                let current = self.read_u32(addr);
                self.write_u32(
                    addr,
                    portsc_write_value(current, current & PORTSC_CHANGE_BITS),
                );
            }
        }
    }

    fn ring_doorbell(&mut self, slot_id: u8, target: u8) {
        // TRB 기록이 도어벨보다 먼저 보여야 함
        fence(Ordering::SeqCst);
        // SAFETY: 도어벨 배열은 슬롯 0..=MaxSlots 범위의 32비트 레지스터입니다.
        unsafe {
            self.write_u32(self.doorbell_base + slot_id as u64 * 4, target as u32);
        }
    }

    fn set_event_dequeue(&mut self, erdp: u64) {
        // SAFETY: Interrupter 0의 ERDP 레지스터입니다.
        unsafe {
            self.write_u64(self.interrupter(ERDP), (erdp & !0xF) | ERDP_EHB);
        }
    }

    fn max_scratchpad_buffers(&self) -> u16 {
        self.max_scratchpad
    }
}
