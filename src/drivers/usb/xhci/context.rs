//! xHCI 디바이스/입력 컨텍스트
//!
//! 컨텍스트 크기는 32바이트(HCCPARAMS1.CSZ = 0)를 가정합니다.
//! 각 컨텍스트는 8개의 dword 배열이며 필드는 비트 오프셋으로 접근합니다.

use crate::drivers::usb::host_controller::PortSpeed;
use crate::memory::Zeroable;

/// 엔드포인트 컨텍스트 수 (DCI 1..=31)
pub const ENDPOINT_CONTEXT_COUNT: usize = 31;

/// 기본 제어 엔드포인트의 Device Context Index
pub const EP0_DCI: u8 = 1;

/// 엔드포인트 번호와 방향으로 Device Context Index 계산
///
/// 제어 엔드포인트 0은 방향과 관계없이 1입니다.
pub fn dci(endpoint_number: u8, is_in: bool) -> u8 {
    if endpoint_number == 0 {
        EP0_DCI
    } else {
        endpoint_number * 2 + is_in as u8
    }
}

/// `bInterval` 값을 엔드포인트 컨텍스트의 Interval(2^n × 125us)로 변환
pub fn interrupt_interval(speed: PortSpeed, b_interval: u8) -> u8 {
    match speed {
        // FS/LS는 프레임(1ms) 단위: 125us × 2^(log2(b)+3)
        PortSpeed::Full | PortSpeed::Low => {
            let frames = b_interval.max(1);
            let log2 = 7 - frames.leading_zeros() as u8;
            (log2 + 3).min(10)
        }
        // HS/SS는 2^(bInterval-1) 마이크로프레임
        _ => b_interval.clamp(1, 16) - 1,
    }
}

fn get_bits(dword: u32, shift: u32, width: u32) -> u32 {
    (dword >> shift) & ((1u32 << width) - 1)
}

fn set_bits(dword: &mut u32, shift: u32, width: u32, value: u32) {
    let mask = ((1u32 << width) - 1) << shift;
    *dword = (*dword & !mask) | ((value << shift) & mask);
}

/// 슬롯 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    DisabledOrEnabled,
    Default,
    Addressed,
    Configured,
    Reserved(u8),
}

/// Slot Context
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotContext {
    dwords: [u32; 8],
}

impl SlotContext {
    pub fn route_string(&self) -> u32 {
        get_bits(self.dwords[0], 0, 20)
    }

    pub fn set_route_string(&mut self, route: u32) {
        set_bits(&mut self.dwords[0], 0, 20, route);
    }

    pub fn speed(&self) -> u8 {
        get_bits(self.dwords[0], 20, 4) as u8
    }

    pub fn set_speed(&mut self, speed: u8) {
        set_bits(&mut self.dwords[0], 20, 4, speed as u32);
    }

    /// 유효한 마지막 엔드포인트 컨텍스트의 DCI
    pub fn context_entries(&self) -> u8 {
        get_bits(self.dwords[0], 27, 5) as u8
    }

    pub fn set_context_entries(&mut self, entries: u8) {
        set_bits(&mut self.dwords[0], 27, 5, entries as u32);
    }

    pub fn root_hub_port(&self) -> u8 {
        get_bits(self.dwords[1], 16, 8) as u8
    }

    pub fn set_root_hub_port(&mut self, port: u8) {
        set_bits(&mut self.dwords[1], 16, 8, port as u32);
    }

    /// 컨트롤러가 할당한 USB 주소 (출력 컨텍스트)
    pub fn usb_device_address(&self) -> u8 {
        get_bits(self.dwords[3], 0, 8) as u8
    }

    pub fn set_usb_device_address(&mut self, address: u8) {
        set_bits(&mut self.dwords[3], 0, 8, address as u32);
    }

    pub fn slot_state(&self) -> SlotState {
        match get_bits(self.dwords[3], 27, 5) as u8 {
            0 => SlotState::DisabledOrEnabled,
            1 => SlotState::Default,
            2 => SlotState::Addressed,
            3 => SlotState::Configured,
            other => SlotState::Reserved(other),
        }
    }

    pub fn set_slot_state(&mut self, state: SlotState) {
        let raw = match state {
            SlotState::DisabledOrEnabled => 0,
            SlotState::Default => 1,
            SlotState::Addressed => 2,
            SlotState::Configured => 3,
            SlotState::Reserved(raw) => raw,
        };
        set_bits(&mut self.dwords[3], 27, 5, raw as u32);
    }
}

/// 엔드포인트 타입 (Endpoint Context의 EP Type 필드)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    NotValid = 0,
    IsochOut = 1,
    BulkOut = 2,
    InterruptOut = 3,
    Control = 4,
    IsochIn = 5,
    BulkIn = 6,
    InterruptIn = 7,
}

impl EndpointType {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => EndpointType::IsochOut,
            2 => EndpointType::BulkOut,
            3 => EndpointType::InterruptOut,
            4 => EndpointType::Control,
            5 => EndpointType::IsochIn,
            6 => EndpointType::BulkIn,
            7 => EndpointType::InterruptIn,
            _ => EndpointType::NotValid,
        }
    }
}

/// Endpoint Context
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointContext {
    dwords: [u32; 8],
}

impl EndpointContext {
    /// 엔드포인트 상태 (0 = Disabled, 1 = Running, 2 = Halted ...)
    pub fn endpoint_state(&self) -> u8 {
        get_bits(self.dwords[0], 0, 3) as u8
    }

    pub fn interval(&self) -> u8 {
        get_bits(self.dwords[0], 16, 8) as u8
    }

    pub fn set_interval(&mut self, interval: u8) {
        set_bits(&mut self.dwords[0], 16, 8, interval as u32);
    }

    pub fn error_count(&self) -> u8 {
        get_bits(self.dwords[1], 1, 2) as u8
    }

    pub fn set_error_count(&mut self, count: u8) {
        set_bits(&mut self.dwords[1], 1, 2, count as u32);
    }

    pub fn endpoint_type(&self) -> EndpointType {
        EndpointType::from_raw(get_bits(self.dwords[1], 3, 3) as u8)
    }

    pub fn set_endpoint_type(&mut self, ty: EndpointType) {
        set_bits(&mut self.dwords[1], 3, 3, ty as u32);
    }

    pub fn max_burst_size(&self) -> u8 {
        get_bits(self.dwords[1], 8, 8) as u8
    }

    pub fn max_packet_size(&self) -> u16 {
        get_bits(self.dwords[1], 16, 16) as u16
    }

    pub fn set_max_packet_size(&mut self, size: u16) {
        set_bits(&mut self.dwords[1], 16, 16, size as u32);
    }

    /// TR Dequeue Pointer (하위 4비트 제외)
    pub fn tr_dequeue_pointer(&self) -> u64 {
        (((self.dwords[3] as u64) << 32) | self.dwords[2] as u64) & !0xF
    }

    /// Dequeue Cycle State
    pub fn dequeue_cycle_state(&self) -> bool {
        self.dwords[2] & 1 != 0
    }

    /// TR Dequeue Pointer와 DCS 설정
    pub fn set_tr_dequeue_pointer(&mut self, pointer: u64, cycle: bool) {
        let value = (pointer & !0xF) | cycle as u64;
        self.dwords[2] = value as u32;
        self.dwords[3] = (value >> 32) as u32;
    }

    pub fn average_trb_length(&self) -> u16 {
        get_bits(self.dwords[4], 0, 16) as u16
    }

    pub fn set_average_trb_length(&mut self, length: u16) {
        set_bits(&mut self.dwords[4], 0, 16, length as u32);
    }

    pub fn max_esit_payload(&self) -> u16 {
        get_bits(self.dwords[4], 16, 16) as u16
    }

    pub fn set_max_esit_payload(&mut self, payload: u16) {
        set_bits(&mut self.dwords[4], 16, 16, payload as u32);
    }
}

/// Input Control Context
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputControlContext {
    dwords: [u32; 8],
}

impl InputControlContext {
    pub fn drop_flags(&self) -> u32 {
        self.dwords[0]
    }

    pub fn add_flags(&self) -> u32 {
        self.dwords[1]
    }

    /// 컨텍스트 추가 플래그 설정 (0 = 슬롯, 1 = EP0, ...)
    pub fn set_add_flag(&mut self, index: u8) {
        self.dwords[1] |= 1 << index;
    }

    pub fn set_drop_flag(&mut self, index: u8) {
        self.dwords[0] |= 1 << index;
    }

    pub fn clear(&mut self) {
        self.dwords = [0; 8];
    }
}

/// Input Context (Address Device / Configure Endpoint 명령의 입력)
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputContext {
    pub control: InputControlContext,
    pub slot: SlotContext,
    pub endpoints: [EndpointContext; ENDPOINT_CONTEXT_COUNT],
}

impl InputContext {
    /// DCI로 엔드포인트 컨텍스트 접근 (1..=31)
    pub fn endpoint_mut(&mut self, dci: u8) -> Option<&mut EndpointContext> {
        let index = (dci as usize).checked_sub(1)?;
        self.endpoints.get_mut(index)
    }

    pub fn endpoint(&self, dci: u8) -> Option<&EndpointContext> {
        let index = (dci as usize).checked_sub(1)?;
        self.endpoints.get(index)
    }
}

/// Device Context (컨트롤러가 쓰는 출력 컨텍스트)
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceContext {
    pub slot: SlotContext,
    pub endpoints: [EndpointContext; ENDPOINT_CONTEXT_COUNT],
}

impl DeviceContext {
    pub fn endpoint(&self, dci: u8) -> Option<&EndpointContext> {
        let index = (dci as usize).checked_sub(1)?;
        self.endpoints.get(index)
    }
}

/// Event Ring Segment Table 엔트리 (16바이트)
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErstEntry {
    /// 세그먼트 베이스 물리 주소 (64바이트 정렬)
    pub ring_segment_base: u64,
    /// 세그먼트의 TRB 수 (하위 16비트)
    pub ring_segment_size: u32,
    _reserved: u32,
}

impl ErstEntry {
    pub fn new(base: u64, size: u16) -> Self {
        Self {
            ring_segment_base: base,
            ring_segment_size: size as u32,
            _reserved: 0,
        }
    }
}

unsafe impl Zeroable for SlotContext {}
unsafe impl Zeroable for EndpointContext {}
unsafe impl Zeroable for InputControlContext {}
unsafe impl Zeroable for InputContext {}
unsafe impl Zeroable for DeviceContext {}
unsafe impl Zeroable for ErstEntry {}
