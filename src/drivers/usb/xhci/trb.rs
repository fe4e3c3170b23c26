//! xHCI Transfer Request Block (TRB) 구조
//!
//! Command Ring, Event Ring, Transfer Ring이 공유하는 16바이트 TRB를 정의합니다.
//! 필드 오프셋은 하드웨어와 비트 단위로 일치해야 하므로
//! `repr(C)` 레이아웃과 명시적인 little-endian 직렬화를 함께 제공합니다.
//!
//! ```text
//! 바이트  0..8   parameter  (링별 포인터/즉시 데이터)
//! 바이트  8..12  status     (전송 길이, 완료 코드 등)
//! 바이트 12..16  control    비트 0 cycle, 비트 1 ENT/TC, 비트 10..16 타입,
//!                           비트 16..32 링별 필드 (슬롯 ID, 엔드포인트 ID, 방향 등)
//! ```

use crate::drivers::usb::request::SetupPacket;
use crate::memory::Zeroable;

/// Control 필드 비트
const CONTROL_CYCLE: u32 = 1 << 0;
const CONTROL_ENT: u32 = 1 << 1; // Evaluate Next TRB (전송 TRB)
const CONTROL_TOGGLE_CYCLE: u32 = 1 << 1; // Toggle Cycle (Link TRB)
const CONTROL_ISP: u32 = 1 << 2; // Interrupt on Short Packet
const CONTROL_CHAIN: u32 = 1 << 4;
const CONTROL_IOC: u32 = 1 << 5; // Interrupt On Completion
const CONTROL_IDT: u32 = 1 << 6; // Immediate Data
const CONTROL_BSR: u32 = 1 << 9; // Block Set Address Request
const CONTROL_TYPE_SHIFT: u32 = 10;
const CONTROL_TYPE_MASK: u32 = 0x3F << CONTROL_TYPE_SHIFT;
const CONTROL_DIR_IN: u32 = 1 << 16;
const CONTROL_TRT_SHIFT: u32 = 16;
const CONTROL_ENDPOINT_SHIFT: u32 = 16;
const CONTROL_SLOT_SHIFT: u32 = 24;

/// TRB 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrbType {
    /// Normal Transfer
    Normal = 1,
    /// Setup Stage
    SetupStage = 2,
    /// Data Stage
    DataStage = 3,
    /// Status Stage
    StatusStage = 4,
    /// Isoch Transfer
    Isoch = 5,
    /// Link TRB
    Link = 6,
    /// Event Data
    EventData = 7,
    /// No-Op
    NoOp = 8,
    /// Enable Slot Command
    EnableSlot = 9,
    /// Disable Slot Command
    DisableSlot = 10,
    /// Address Device Command
    AddressDevice = 11,
    /// Configure Endpoint Command
    ConfigureEndpoint = 12,
    /// Evaluate Context Command
    EvaluateContext = 13,
    /// Reset Endpoint Command
    ResetEndpoint = 14,
    /// Stop Endpoint Command
    StopEndpoint = 15,
    /// Set TR Dequeue Pointer
    SetTrDequeuePointer = 16,
    /// Reset Device Command
    ResetDevice = 17,
    /// No-Op Command
    NoOpCommand = 23,
    /// Transfer Event
    TransferEvent = 32,
    /// Command Completion Event
    CommandCompletionEvent = 33,
    /// Port Status Change Event
    PortStatusChangeEvent = 34,
    /// Host Controller Event
    HostControllerEvent = 37,
}

impl TrbType {
    /// 6비트 타입 값에서 변환
    pub fn from_raw(raw: u8) -> Option<Self> {
        let ty = match raw {
            1 => TrbType::Normal,
            2 => TrbType::SetupStage,
            3 => TrbType::DataStage,
            4 => TrbType::StatusStage,
            5 => TrbType::Isoch,
            6 => TrbType::Link,
            7 => TrbType::EventData,
            8 => TrbType::NoOp,
            9 => TrbType::EnableSlot,
            10 => TrbType::DisableSlot,
            11 => TrbType::AddressDevice,
            12 => TrbType::ConfigureEndpoint,
            13 => TrbType::EvaluateContext,
            14 => TrbType::ResetEndpoint,
            15 => TrbType::StopEndpoint,
            16 => TrbType::SetTrDequeuePointer,
            17 => TrbType::ResetDevice,
            23 => TrbType::NoOpCommand,
            32 => TrbType::TransferEvent,
            33 => TrbType::CommandCompletionEvent,
            34 => TrbType::PortStatusChangeEvent,
            37 => TrbType::HostControllerEvent,
            _ => return None,
        };
        Some(ty)
    }
}

/// TRB 완료 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Invalid,
    Success,
    DataBufferError,
    BabbleDetected,
    UsbTransactionError,
    TrbError,
    StallError,
    ResourceError,
    BandwidthError,
    NoSlotsAvailable,
    SlotNotEnabled,
    EndpointNotEnabled,
    ShortPacket,
    ParameterError,
    ContextStateError,
    EventRingFull,
    CommandRingStopped,
    CommandAborted,
    Stopped,
    /// 위에 없는 코드
    Other(u8),
}

impl CompletionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => CompletionCode::Invalid,
            1 => CompletionCode::Success,
            2 => CompletionCode::DataBufferError,
            3 => CompletionCode::BabbleDetected,
            4 => CompletionCode::UsbTransactionError,
            5 => CompletionCode::TrbError,
            6 => CompletionCode::StallError,
            7 => CompletionCode::ResourceError,
            8 => CompletionCode::BandwidthError,
            9 => CompletionCode::NoSlotsAvailable,
            11 => CompletionCode::SlotNotEnabled,
            12 => CompletionCode::EndpointNotEnabled,
            13 => CompletionCode::ShortPacket,
            17 => CompletionCode::ParameterError,
            19 => CompletionCode::ContextStateError,
            21 => CompletionCode::EventRingFull,
            24 => CompletionCode::CommandRingStopped,
            25 => CompletionCode::CommandAborted,
            26 => CompletionCode::Stopped,
            other => CompletionCode::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CompletionCode::Invalid => 0,
            CompletionCode::Success => 1,
            CompletionCode::DataBufferError => 2,
            CompletionCode::BabbleDetected => 3,
            CompletionCode::UsbTransactionError => 4,
            CompletionCode::TrbError => 5,
            CompletionCode::StallError => 6,
            CompletionCode::ResourceError => 7,
            CompletionCode::BandwidthError => 8,
            CompletionCode::NoSlotsAvailable => 9,
            CompletionCode::SlotNotEnabled => 11,
            CompletionCode::EndpointNotEnabled => 12,
            CompletionCode::ShortPacket => 13,
            CompletionCode::ParameterError => 17,
            CompletionCode::ContextStateError => 19,
            CompletionCode::EventRingFull => 21,
            CompletionCode::CommandRingStopped => 24,
            CompletionCode::CommandAborted => 25,
            CompletionCode::Stopped => 26,
            CompletionCode::Other(code) => code,
        }
    }

    /// 성공으로 취급되는 코드 (Short Packet 포함)
    pub fn is_success(self) -> bool {
        matches!(self, CompletionCode::Success | CompletionCode::ShortPacket)
    }
}

/// Setup Stage의 Transfer Type (TRT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    NoData = 0,
    OutData = 2,
    InData = 3,
}

/// TRB (Transfer Request Block) - 16바이트
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trb {
    /// Parameter (비트 0-63)
    pub parameter: u64,
    /// Status (비트 64-95)
    pub status: u32,
    /// Control (비트 96-127)
    pub control: u32,
}

unsafe impl Zeroable for Trb {}

impl Trb {
    /// TRB 크기 (바이트)
    pub const SIZE: usize = 16;

    /// 빈 TRB 생성
    pub const fn new() -> Self {
        Self {
            parameter: 0,
            status: 0,
            control: 0,
        }
    }

    fn with_type(trb_type: TrbType) -> Self {
        let mut trb = Self::new();
        trb.set_raw_type(trb_type as u8);
        trb
    }

    /// little-endian 16바이트로 직렬화
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&self.parameter.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.status.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.control.to_le_bytes());
        bytes
    }

    /// little-endian 16바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let mut parameter = [0u8; 8];
        parameter.copy_from_slice(&bytes[0..8]);
        let mut status = [0u8; 4];
        status.copy_from_slice(&bytes[8..12]);
        let mut control = [0u8; 4];
        control.copy_from_slice(&bytes[12..16]);
        Self {
            parameter: u64::from_le_bytes(parameter),
            status: u32::from_le_bytes(status),
            control: u32::from_le_bytes(control),
        }
    }

    // ---- 공통 필드 ----

    pub fn cycle_bit(&self) -> bool {
        self.control & CONTROL_CYCLE != 0
    }

    pub fn set_cycle_bit(&mut self, cycle: bool) {
        if cycle {
            self.control |= CONTROL_CYCLE;
        } else {
            self.control &= !CONTROL_CYCLE;
        }
    }

    pub fn evaluate_next_trb(&self) -> bool {
        self.control & CONTROL_ENT != 0
    }

    pub fn set_evaluate_next_trb(&mut self, ent: bool) {
        self.set_flag(CONTROL_ENT, ent);
    }

    /// Link TRB의 Toggle Cycle 비트
    pub fn toggle_cycle(&self) -> bool {
        self.control & CONTROL_TOGGLE_CYCLE != 0
    }

    pub fn interrupt_on_completion(&self) -> bool {
        self.control & CONTROL_IOC != 0
    }

    pub fn raw_type(&self) -> u8 {
        ((self.control & CONTROL_TYPE_MASK) >> CONTROL_TYPE_SHIFT) as u8
    }

    pub fn set_raw_type(&mut self, raw: u8) {
        self.control = (self.control & !CONTROL_TYPE_MASK)
            | (((raw as u32) << CONTROL_TYPE_SHIFT) & CONTROL_TYPE_MASK);
    }

    pub fn trb_type(&self) -> Option<TrbType> {
        TrbType::from_raw(self.raw_type())
    }

    /// Control 필드의 상위 16비트 (링별 필드)
    pub fn ring_specific(&self) -> u16 {
        (self.control >> 16) as u16
    }

    /// 슬롯 ID (Command/Event TRB의 control 비트 24-31)
    pub fn slot_id(&self) -> u8 {
        (self.control >> CONTROL_SLOT_SHIFT) as u8
    }

    fn set_slot_id(&mut self, slot_id: u8) {
        self.control = (self.control & 0x00FF_FFFF) | ((slot_id as u32) << CONTROL_SLOT_SHIFT);
    }

    fn set_flag(&mut self, flag: u32, on: bool) {
        if on {
            self.control |= flag;
        } else {
            self.control &= !flag;
        }
    }

    /// 이벤트 TRB의 완료 코드 (status 비트 24-31)
    pub fn completion_code(&self) -> CompletionCode {
        CompletionCode::from_u8((self.status >> 24) as u8)
    }

    // ---- Command TRB ----

    /// Enable Slot Command TRB 생성
    pub fn enable_slot() -> Self {
        Self::with_type(TrbType::EnableSlot)
    }

    /// Disable Slot Command TRB 생성
    pub fn disable_slot(slot_id: u8) -> Self {
        let mut trb = Self::with_type(TrbType::DisableSlot);
        trb.set_slot_id(slot_id);
        trb
    }

    /// Address Device Command TRB 생성
    pub fn address_device(input_context: u64, slot_id: u8, block_set_address: bool) -> Self {
        let mut trb = Self::with_type(TrbType::AddressDevice);
        trb.parameter = input_context;
        trb.set_flag(CONTROL_BSR, block_set_address);
        trb.set_slot_id(slot_id);
        trb
    }

    /// Configure Endpoint Command TRB 생성
    pub fn configure_endpoint(input_context: u64, slot_id: u8) -> Self {
        let mut trb = Self::with_type(TrbType::ConfigureEndpoint);
        trb.parameter = input_context;
        trb.set_slot_id(slot_id);
        trb
    }

    /// Evaluate Context Command TRB 생성
    pub fn evaluate_context(input_context: u64, slot_id: u8) -> Self {
        let mut trb = Self::with_type(TrbType::EvaluateContext);
        trb.parameter = input_context;
        trb.set_slot_id(slot_id);
        trb
    }

    /// No-Op Command TRB 생성
    pub fn noop_command() -> Self {
        Self::with_type(TrbType::NoOpCommand)
    }

    // ---- Transfer TRB ----

    /// Normal Transfer TRB 생성
    pub fn normal(data_buffer: u64, transfer_length: u32, interrupt_on_completion: bool) -> Self {
        let mut trb = Self::with_type(TrbType::Normal);
        trb.parameter = data_buffer;
        trb.status = transfer_length & 0x1_FFFF;
        trb.set_flag(CONTROL_ISP, true);
        trb.set_flag(CONTROL_IOC, interrupt_on_completion);
        trb
    }

    /// Setup Stage TRB 생성 (8바이트 요청을 즉시 데이터로 포함)
    pub fn setup_stage(request: &SetupPacket, transfer_type: TransferType) -> Self {
        let mut trb = Self::with_type(TrbType::SetupStage);
        trb.parameter = u64::from_le_bytes(request.to_bytes());
        trb.status = 8;
        trb.set_flag(CONTROL_IDT, true);
        trb.control |= (transfer_type as u32) << CONTROL_TRT_SHIFT;
        trb
    }

    /// Data Stage TRB 생성
    pub fn data_stage(data_buffer: u64, transfer_length: u32, direction_in: bool) -> Self {
        let mut trb = Self::with_type(TrbType::DataStage);
        trb.parameter = data_buffer;
        trb.status = transfer_length & 0x1_FFFF;
        trb.set_flag(CONTROL_DIR_IN, direction_in);
        trb
    }

    /// Status Stage TRB 생성
    pub fn status_stage(direction_in: bool, interrupt_on_completion: bool) -> Self {
        let mut trb = Self::with_type(TrbType::StatusStage);
        trb.set_flag(CONTROL_DIR_IN, direction_in);
        trb.set_flag(CONTROL_IOC, interrupt_on_completion);
        trb
    }

    /// Link TRB 생성 (세그먼트 끝에서 링 시작으로 연결)
    pub fn link(ring_segment: u64, toggle_cycle: bool) -> Self {
        let mut trb = Self::with_type(TrbType::Link);
        trb.parameter = ring_segment;
        trb.set_flag(CONTROL_TOGGLE_CYCLE, toggle_cycle);
        trb
    }

    /// Data/Status Stage의 방향 비트 (true = IN)
    pub fn direction_in(&self) -> bool {
        self.control & CONTROL_DIR_IN != 0
    }

    /// Normal/Data Stage의 전송 길이
    pub fn transfer_length(&self) -> u32 {
        self.status & 0x1_FFFF
    }

    pub fn is_chained(&self) -> bool {
        self.control & CONTROL_CHAIN != 0
    }

    // ---- Event TRB ----

    /// 이벤트 TRB 해석
    pub fn event(&self) -> Event {
        match self.trb_type() {
            Some(TrbType::TransferEvent) => Event::Transfer(TransferEvent {
                trb_pointer: self.parameter,
                residual_length: self.status & 0x00FF_FFFF,
                completion_code: self.completion_code(),
                endpoint_id: ((self.control >> CONTROL_ENDPOINT_SHIFT) & 0x1F) as u8,
                slot_id: self.slot_id(),
            }),
            Some(TrbType::CommandCompletionEvent) => {
                Event::CommandCompletion(CommandCompletionEvent {
                    command_trb_pointer: self.parameter & !0xF,
                    completion_code: self.completion_code(),
                    slot_id: self.slot_id(),
                })
            }
            Some(TrbType::PortStatusChangeEvent) => {
                Event::PortStatusChange(PortStatusChangeEvent {
                    port_id: ((self.parameter >> 24) & 0xFF) as u8,
                    completion_code: self.completion_code(),
                })
            }
            _ => Event::Other(self.raw_type()),
        }
    }
}

/// Event Ring에서 읽은 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Transfer(TransferEvent),
    CommandCompletion(CommandCompletionEvent),
    PortStatusChange(PortStatusChangeEvent),
    /// 처리하지 않는 이벤트 타입
    Other(u8),
}

/// Transfer Event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEvent {
    /// 완료된 Transfer TRB의 물리 주소
    pub trb_pointer: u64,
    /// 전송되지 않고 남은 바이트 수
    pub residual_length: u32,
    pub completion_code: CompletionCode,
    /// Device Context Index
    pub endpoint_id: u8,
    pub slot_id: u8,
}

impl TransferEvent {
    /// 하드웨어가 Event Ring에 쓰는 형태로 인코딩
    pub fn to_trb(&self) -> Trb {
        let mut trb = Trb::with_type(TrbType::TransferEvent);
        trb.parameter = self.trb_pointer;
        trb.status = ((self.completion_code.as_u8() as u32) << 24) | (self.residual_length & 0x00FF_FFFF);
        trb.control |= ((self.endpoint_id as u32) & 0x1F) << CONTROL_ENDPOINT_SHIFT;
        trb.set_slot_id(self.slot_id);
        trb
    }
}

/// Command Completion Event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandCompletionEvent {
    /// 완료된 Command TRB의 물리 주소
    pub command_trb_pointer: u64,
    pub completion_code: CompletionCode,
    /// Enable Slot의 경우 새로 할당된 슬롯 ID
    pub slot_id: u8,
}

impl CommandCompletionEvent {
    /// 하드웨어가 Event Ring에 쓰는 형태로 인코딩
    pub fn to_trb(&self) -> Trb {
        let mut trb = Trb::with_type(TrbType::CommandCompletionEvent);
        trb.parameter = self.command_trb_pointer;
        trb.status = (self.completion_code.as_u8() as u32) << 24;
        trb.set_slot_id(self.slot_id);
        trb
    }
}

/// Port Status Change Event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatusChangeEvent {
    /// 루트 허브 포트 번호 (1부터)
    pub port_id: u8,
    pub completion_code: CompletionCode,
}

impl PortStatusChangeEvent {
    /// 하드웨어가 Event Ring에 쓰는 형태로 인코딩
    pub fn to_trb(&self) -> Trb {
        let mut trb = Trb::with_type(TrbType::PortStatusChangeEvent);
        trb.parameter = (self.port_id as u64) << 24;
        trb.status = (self.completion_code.as_u8() as u32) << 24;
        trb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    #[test]
    fn trb_is_sixteen_bytes_and_aligned() {
        assert_eq!(mem::size_of::<Trb>(), Trb::SIZE);
        assert_eq!(mem::align_of::<Trb>(), 16);
    }

    #[test]
    fn byte_layout_matches_hardware_offsets() {
        let mut trb = Trb::address_device(0x1122_3344_5566_7780, 3, false);
        trb.status = 0xAABB_CCDD;
        trb.set_cycle_bit(true);

        let bytes = trb.to_bytes();
        assert_eq!(&bytes[0..8], &[0x80, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[8..12], &[0xDD, 0xCC, 0xBB, 0xAA]);
        // type 11 << 10 = 0x2C00, cycle = 1, slot 3 << 24
        assert_eq!(&bytes[12..16], &[0x01, 0x2C, 0x00, 0x03]);

        // repr(C) 메모리 표현도 같은 바이트열이어야 함
        let raw: [u8; 16] = unsafe { mem::transmute(trb) };
        assert_eq!(raw, bytes);
        assert_eq!(Trb::from_bytes(&bytes), trb);
    }

    #[test]
    fn type_and_cycle_fields_are_independent() {
        let mut trb = Trb::new();
        trb.set_raw_type(TrbType::Link as u8);
        trb.set_cycle_bit(true);
        assert_eq!(trb.trb_type(), Some(TrbType::Link));
        trb.set_cycle_bit(false);
        assert_eq!(trb.trb_type(), Some(TrbType::Link));
        assert!(!trb.cycle_bit());
        trb.set_raw_type(TrbType::Normal as u8);
        assert_eq!(trb.raw_type(), 1);
    }

    #[test]
    fn link_trb_toggle_flag() {
        let link = Trb::link(0x1000, true);
        assert!(link.toggle_cycle());
        assert_eq!(link.parameter, 0x1000);
        assert!(!Trb::link(0x1000, false).toggle_cycle());
    }

    #[test]
    fn setup_stage_carries_request_inline() {
        let request = SetupPacket::get_descriptor(crate::drivers::usb::descriptor::DescriptorType::Device, 0, 18);
        let trb = Trb::setup_stage(&request, TransferType::InData);
        assert_eq!(trb.parameter.to_le_bytes(), request.to_bytes());
        assert_eq!(trb.status, 8);
        assert_eq!(trb.ring_specific() & 0x3, 3);
    }

    #[test]
    fn events_decode_their_fields() {
        let completion = CommandCompletionEvent {
            command_trb_pointer: 0xABC0,
            completion_code: CompletionCode::Success,
            slot_id: 3,
        };
        assert_eq!(completion.to_trb().event(), Event::CommandCompletion(completion));

        let transfer = TransferEvent {
            trb_pointer: 0x2000,
            residual_length: 5,
            completion_code: CompletionCode::ShortPacket,
            endpoint_id: 3,
            slot_id: 7,
        };
        assert_eq!(transfer.to_trb().event(), Event::Transfer(transfer));

        let psc = PortStatusChangeEvent {
            port_id: 4,
            completion_code: CompletionCode::Success,
        };
        assert_eq!(psc.to_trb().event(), Event::PortStatusChange(psc));
    }

    #[test]
    fn completion_codes_map_both_ways() {
        for raw in 0..=255u8 {
            assert_eq!(CompletionCode::from_u8(raw).as_u8(), raw);
        }
        assert!(CompletionCode::ShortPacket.is_success());
        assert!(!CompletionCode::StallError.is_success());
    }
}
