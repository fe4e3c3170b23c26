//! 디바이스 열거 상태 머신
//!
//! 포트마다 독립된 [`DeviceEnumeration`]이 하나씩 있으며,
//! 명령 완료와 제어 전송 완료 이벤트가 올 때마다 한 단계씩 진행합니다.
//!
//! ```text
//! PortDetected → SlotEnabling → SlotEnabled → AddressingDevice → Addressed
//!   → DescriptorReading → InterfaceDiscovered → EndpointsConfiguring
//!   → Configured → ClassDriverAttached
//! ```
//!
//! 어느 단계에서든 실패하면 `EnumerationFailed`로 가고 슬롯을 해제합니다.
//! 한 디바이스의 실패는 다른 포트의 열거에 영향을 주지 않습니다.

use alloc::vec;

use crate::drivers::usb::core::{CommandKind, UsbManager};
use crate::drivers::usb::descriptor::{
    find_hid_boot_interfaces, ConfigurationDescriptor, DescriptorType, DeviceDescriptor,
    EndpointDescriptor, InterfaceDescriptor,
};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::hid::{self, ClassDriver, ClassDriverKind, HidClassDriver};
use crate::drivers::usb::host_controller::{PortSpeed, UsbHostController};
use crate::drivers::usb::request::{HidProtocol, SetupPacket};
use crate::drivers::usb::xhci::context::{
    dci, interrupt_interval, EndpointContext, EndpointType, SlotContext, EP0_DCI,
};
use crate::drivers::usb::xhci::slot::SlotHandle;
use crate::drivers::usb::xhci::trb::{CommandCompletionEvent, CompletionCode, TransferEvent, TransferType, Trb};

/// 제어 엔드포인트 오류 재시도 횟수 (CErr)
const ERROR_COUNT: u8 = 3;
/// 제어 전송 평균 TRB 길이
const CONTROL_AVERAGE_TRB_LENGTH: u16 = 8;

/// 열거 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationState {
    PortDetected,
    SlotEnabling,
    SlotEnabled,
    AddressingDevice,
    Addressed,
    DescriptorReading,
    InterfaceDiscovered,
    EndpointsConfiguring,
    Configured,
    ClassDriverAttached,
    EnumerationFailed,
}

impl EnumerationState {
    /// 허용되는 전이인지
    pub fn can_transition_to(self, next: EnumerationState) -> bool {
        use EnumerationState::*;
        match (self, next) {
            (EnumerationFailed, _) => false,
            (_, EnumerationFailed) => true,
            (PortDetected, SlotEnabling)
            | (SlotEnabling, SlotEnabled)
            | (SlotEnabled, AddressingDevice)
            | (AddressingDevice, Addressed)
            | (Addressed, DescriptorReading)
            | (DescriptorReading, InterfaceDiscovered)
            | (InterfaceDiscovered, EndpointsConfiguring)
            | (EndpointsConfiguring, Configured)
            | (Configured, ClassDriverAttached) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnumerationState::ClassDriverAttached | EnumerationState::EnumerationFailed
        )
    }
}

/// EP0에서 진행 중인 제어 전송 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStep {
    /// 디바이스 디스크립터 앞 8바이트 (EP0 최대 패킷 크기 확인)
    DeviceDescriptorHeader,
    DeviceDescriptor,
    ConfigurationHeader,
    ConfigurationDescriptor,
    SetConfiguration,
    SetProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingControl {
    step: ControlStep,
    /// Status Stage TRB 주소 (IOC가 걸린 TRB)
    status_trb: u64,
    length: u16,
}

/// 클래스 드라이버가 붙을 인터페이스
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceBinding {
    pub kind: ClassDriverKind,
    pub interface: InterfaceDescriptor,
    pub endpoint: EndpointDescriptor,
    pub configuration_value: u8,
}

impl InterfaceBinding {
    /// Interrupt IN 엔드포인트의 DCI
    pub fn endpoint_dci(&self) -> u8 {
        dci(self.endpoint.endpoint_number(), true)
    }
}

/// 실패 기록
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumerationFailure {
    /// 실패한 시점의 상태
    pub state: EnumerationState,
    pub error: UsbError,
}

/// 포트 하나의 열거 진행 상황
#[derive(Debug)]
pub struct DeviceEnumeration {
    port_id: u8,
    attempt: u64,
    speed: Option<PortSpeed>,
    state: EnumerationState,
    slot: Option<SlotHandle>,
    control: Option<PendingControl>,
    device_descriptor: Option<DeviceDescriptor>,
    binding: Option<InterfaceBinding>,
    failure: Option<EnumerationFailure>,
}

impl DeviceEnumeration {
    pub fn new(port_id: u8, speed: Option<PortSpeed>) -> Self {
        Self {
            port_id,
            attempt: 0,
            speed,
            state: EnumerationState::PortDetected,
            slot: None,
            control: None,
            device_descriptor: None,
            binding: None,
            failure: None,
        }
    }

    pub(super) fn with_attempt(mut self, attempt: u64) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn port_id(&self) -> u8 {
        self.port_id
    }

    /// 열거 시도 번호 (연결될 때마다 증가)
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn speed(&self) -> Option<PortSpeed> {
        self.speed
    }

    pub fn state(&self) -> EnumerationState {
        self.state
    }

    pub fn slot(&self) -> Option<SlotHandle> {
        self.slot
    }

    pub fn device_descriptor(&self) -> Option<&DeviceDescriptor> {
        self.device_descriptor.as_ref()
    }

    pub fn binding(&self) -> Option<&InterfaceBinding> {
        self.binding.as_ref()
    }

    pub fn failure(&self) -> Option<&EnumerationFailure> {
        self.failure.as_ref()
    }

    /// 제어 전송 대기 중인지
    pub fn control_pending(&self) -> Option<ControlStep> {
        self.control.map(|pending| pending.step)
    }

    pub(super) fn take_slot(&mut self) -> Option<SlotHandle> {
        self.slot.take()
    }

    fn advance(&mut self, next: EnumerationState) -> Result<(), UsbError> {
        if !self.state.can_transition_to(next) {
            crate::log_error!(
                "USB port {}: invalid transition {:?} -> {:?}",
                self.port_id,
                self.state,
                next
            );
            return Err(UsbError::InvalidParameter);
        }
        crate::log_trace!("USB port {}: {:?} -> {:?}", self.port_id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// 실패 상태로 전이하고 원인 기록
    pub(super) fn fail(&mut self, error: UsbError) {
        if self.state == EnumerationState::EnumerationFailed {
            return;
        }
        self.failure = Some(EnumerationFailure {
            state: self.state,
            error,
        });
        match error {
            UsbError::UnrecognizedInterface => {
                crate::log_info!(
                    "USB port {}: no class driver for device, skipped",
                    self.port_id
                );
            }
            _ => {
                crate::log_warn!(
                    "USB port {}: enumeration failed at {:?}: {}",
                    self.port_id,
                    self.state,
                    error
                );
            }
        }
        self.state = EnumerationState::EnumerationFailed;
        self.control = None;
    }
}

/// 완료 코드를 결과로
fn check_completion(code: CompletionCode) -> Result<(), UsbError> {
    if code.is_success() {
        Ok(())
    } else {
        Err(UsbError::CommandCompletionError(code))
    }
}

impl<H: UsbHostController> UsbManager<H> {
    fn enumeration_mut(&mut self, port_id: u8) -> Result<&mut DeviceEnumeration, UsbError> {
        self.enumerations
            .get_mut(&port_id)
            .ok_or(UsbError::DeviceNotFound)
    }

    fn enumeration_slot(&self, port_id: u8) -> Result<SlotHandle, UsbError> {
        self.enumerations
            .get(&port_id)
            .and_then(|e| e.slot)
            .ok_or(UsbError::NotInitialized)
    }

    /// 슬롯 ID로 열거 중인 포트 찾기
    fn port_for_slot(&self, slot_id: u8) -> Option<u8> {
        self.enumerations
            .iter()
            .find(|(_, e)| e.slot.map_or(false, |handle| handle.slot_id() == slot_id))
            .map(|(&port_id, _)| port_id)
    }

    /// 상태가 `expected`일 때만 진행
    fn in_state(&self, port_id: u8, expected: EnumerationState) -> bool {
        self.enumerations
            .get(&port_id)
            .map_or(false, |e| e.state == expected)
    }

    /// 활성화된 포트에서 열거 시작 (Enable Slot 발행)
    pub(super) fn begin_enumeration(&mut self, port_id: u8, speed: Option<PortSpeed>) {
        crate::log_info!("USB port {}: device attached ({:?})", port_id, speed);
        self.track_port(port_id, speed);

        let result = match speed {
            Some(_) => self
                .issue_command(port_id, CommandKind::EnableSlot, Trb::enable_slot())
                .and_then(|_| self.enumeration_mut(port_id)?.advance(EnumerationState::SlotEnabling)),
            None => Err(UsbError::InvalidParameter),
        };
        if let Err(error) = result {
            self.fail_enumeration(port_id, error);
        }
    }

    /// Command Completion Event 처리
    ///
    /// 완료는 발행 순서와 무관하게 올 수 있으므로 Command TRB 주소로 명령을 찾습니다.
    pub(super) fn on_command_completion(&mut self, event: CommandCompletionEvent) {
        self.command_ring.advance_dequeue(event.command_trb_pointer);
        let Some(command) = self.pending_commands.remove(&event.command_trb_pointer) else {
            self.on_orphan_completion(event);
            return;
        };

        let port_id = command.port_id;
        if command.kind != CommandKind::DisableSlot && !self.is_current_attempt(&command) {
            // 분리 전 디바이스에 낸 명령
            crate::log_debug!("USB port {}: stale {:?} completion", port_id, command.kind);
            if command.kind == CommandKind::EnableSlot && event.completion_code.is_success() {
                self.disable_hardware_slot(port_id, event.slot_id);
            }
            return;
        }

        let result = match command.kind {
            CommandKind::EnableSlot => self.on_slot_enabled(port_id, event),
            CommandKind::AddressDevice => self.on_device_addressed(port_id, event),
            CommandKind::EvaluateContext => self.on_context_evaluated(port_id, event),
            CommandKind::ConfigureEndpoint => self.on_endpoints_configured(port_id, event),
            CommandKind::DisableSlot => {
                crate::log_debug!(
                    "USB port {}: slot {} disabled ({:?})",
                    port_id,
                    command.slot_id,
                    event.completion_code
                );
                self.reclaim_slot(command.slot_id);
                Ok(())
            }
        };
        if let Err(error) = result {
            self.fail_enumeration(port_id, error);
        }
    }

    fn on_slot_enabled(&mut self, port_id: u8, event: CommandCompletionEvent) -> Result<(), UsbError> {
        if !self.in_state(port_id, EnumerationState::SlotEnabling) {
            // 포트가 이미 실패/분리됨: 컨트롤러가 준 슬롯은 돌려줌
            if event.completion_code.is_success() {
                self.disable_hardware_slot(port_id, event.slot_id);
            }
            return Ok(());
        }

        match event.completion_code {
            CompletionCode::Success => {}
            CompletionCode::NoSlotsAvailable => return Err(UsbError::SlotAllocationFailed),
            code => return Err(UsbError::CommandCompletionError(code)),
        }

        let speed = self
            .enumerations
            .get(&port_id)
            .and_then(|e| e.speed)
            .ok_or(UsbError::InvalidParameter)?;
        let handle = match self.slots.allocate_slot(event.slot_id, port_id, speed) {
            Ok(handle) => handle,
            Err(error) => {
                self.disable_hardware_slot(port_id, event.slot_id);
                return Err(error);
            }
        };

        let enumeration = self.enumeration_mut(port_id)?;
        enumeration.slot = Some(handle);
        enumeration.advance(EnumerationState::SlotEnabled)?;
        crate::log_debug!("USB port {}: slot {} enabled", port_id, event.slot_id);

        self.address_device(port_id)
    }

    /// 기본 제어 엔드포인트를 입력 컨텍스트에 채우고 Address Device 발행
    fn address_device(&mut self, port_id: u8) -> Result<(), UsbError> {
        let handle = self.enumeration_slot(port_id)?;
        let slot_id = handle.slot_id();
        let slot = self.slots.get(handle).ok_or(UsbError::SlotNotFound(slot_id))?;
        let speed = slot.speed();
        let input_phys = slot.input_context_phys();
        let ep0 = slot
            .transfer_ring(EP0_DCI)
            .ok_or(UsbError::NotInitialized)?;
        let (ring_base, ring_cycle) = (ep0.base_phys(), ep0.cycle_state());

        let input = self
            .slots
            .input_context_for(slot_id)
            .ok_or(UsbError::SlotNotFound(slot_id))?;
        input.control.clear();
        input.control.set_add_flag(0);
        input.control.set_add_flag(EP0_DCI);

        input.slot = SlotContext::default();
        input.slot.set_route_string(0);
        input.slot.set_speed(speed as u8);
        input.slot.set_context_entries(EP0_DCI);
        input.slot.set_root_hub_port(port_id);

        let ep0 = input
            .endpoint_mut(EP0_DCI)
            .ok_or(UsbError::InvalidParameter)?;
        *ep0 = EndpointContext::default();
        ep0.set_endpoint_type(EndpointType::Control);
        ep0.set_max_packet_size(speed.default_max_packet_size());
        ep0.set_error_count(ERROR_COUNT);
        ep0.set_tr_dequeue_pointer(ring_base, ring_cycle);
        ep0.set_average_trb_length(CONTROL_AVERAGE_TRB_LENGTH);

        self.issue_command(
            port_id,
            CommandKind::AddressDevice,
            Trb::address_device(input_phys, slot_id, false),
        )?;
        self.enumeration_mut(port_id)?
            .advance(EnumerationState::AddressingDevice)
    }

    fn on_device_addressed(&mut self, port_id: u8, event: CommandCompletionEvent) -> Result<(), UsbError> {
        if !self.in_state(port_id, EnumerationState::AddressingDevice) {
            return Ok(());
        }
        check_completion(event.completion_code)?;
        self.enumeration_mut(port_id)?
            .advance(EnumerationState::Addressed)?;

        let handle = self.enumeration_slot(port_id)?;
        if let Some(slot) = self.slots.get(handle) {
            crate::log_debug!(
                "USB port {}: slot {} has address {}",
                port_id,
                handle.slot_id(),
                slot.output_context().slot.usb_device_address()
            );
        }

        self.control_transfer(
            port_id,
            ControlStep::DeviceDescriptorHeader,
            SetupPacket::get_descriptor(DescriptorType::Device, 0, DeviceDescriptor::HEADER_LENGTH as u16),
        )?;
        self.enumeration_mut(port_id)?
            .advance(EnumerationState::DescriptorReading)
    }

    /// 앞 8바이트에서 EP0 최대 패킷 크기를 확인
    ///
    /// 포트 속도로 가정한 값과 다르면 Evaluate Context로 EP0 컨텍스트를 고친 뒤
    /// 전체 디스크립터를 읽습니다.
    fn on_device_descriptor_header(&mut self, port_id: u8) -> Result<(), UsbError> {
        let bytes = self.read_control_buffer(port_id, DeviceDescriptor::HEADER_LENGTH)?;
        let max_packet_size = DeviceDescriptor::ep0_max_packet_size(&bytes)?;
        let handle = self.enumeration_slot(port_id)?;
        let current = self
            .slots
            .get(handle)
            .and_then(|slot| slot.input_context().endpoint(EP0_DCI).map(|ep0| ep0.max_packet_size()))
            .ok_or(UsbError::SlotNotFound(handle.slot_id()))?;

        if max_packet_size == current {
            return self.request_device_descriptor(port_id);
        }
        crate::log_debug!(
            "USB port {}: EP0 max packet size {} -> {}",
            port_id,
            current,
            max_packet_size
        );
        self.evaluate_ep0(port_id, handle, max_packet_size)
    }

    /// EP0 최대 패킷 크기만 바꾸는 Evaluate Context 발행
    fn evaluate_ep0(&mut self, port_id: u8, handle: SlotHandle, max_packet_size: u16) -> Result<(), UsbError> {
        let slot_id = handle.slot_id();
        let input_phys = self
            .slots
            .get(handle)
            .map(|slot| slot.input_context_phys())
            .ok_or(UsbError::SlotNotFound(slot_id))?;
        let input = self
            .slots
            .input_context_for(slot_id)
            .ok_or(UsbError::SlotNotFound(slot_id))?;
        input.control.clear();
        input.control.set_add_flag(EP0_DCI);
        input
            .endpoint_mut(EP0_DCI)
            .ok_or(UsbError::InvalidParameter)?
            .set_max_packet_size(max_packet_size);

        self.issue_command(
            port_id,
            CommandKind::EvaluateContext,
            Trb::evaluate_context(input_phys, slot_id),
        )?;
        Ok(())
    }

    fn on_context_evaluated(&mut self, port_id: u8, event: CommandCompletionEvent) -> Result<(), UsbError> {
        if !self.in_state(port_id, EnumerationState::DescriptorReading) {
            return Ok(());
        }
        check_completion(event.completion_code)?;
        self.request_device_descriptor(port_id)
    }

    fn request_device_descriptor(&mut self, port_id: u8) -> Result<(), UsbError> {
        self.control_transfer(
            port_id,
            ControlStep::DeviceDescriptor,
            SetupPacket::get_descriptor(DescriptorType::Device, 0, DeviceDescriptor::LENGTH as u16),
        )
    }

    /// EP0에 Setup/Data/Status TRB를 넣고 도어벨
    ///
    /// 데이터 단계는 슬롯의 제어 버퍼를 사용합니다. 완료는 Status TRB의 이벤트로 판단합니다.
    fn control_transfer(&mut self, port_id: u8, step: ControlStep, request: SetupPacket) -> Result<(), UsbError> {
        let handle = self.enumeration_slot(port_id)?;
        let slot_id = handle.slot_id();
        let slot = self
            .slots
            .get_mut(handle)
            .ok_or(UsbError::SlotNotFound(slot_id))?;

        let length = request.length as usize;
        if length > slot.control_buffer().len() {
            return Err(UsbError::InvalidParameter);
        }
        slot.control_buffer_mut().clear();
        let buffer = slot.control_buffer().phys_addr().as_u64();

        let ring = slot
            .transfer_ring_mut(EP0_DCI)
            .ok_or(UsbError::NotInitialized)?;
        let stages = if length > 0 { 3 } else { 2 };
        if ring.capacity() - ring.len() < stages {
            return Err(UsbError::RingFull);
        }

        let direction_in = request.is_device_to_host();
        let transfer_type = match (length, direction_in) {
            (0, _) => TransferType::NoData,
            (_, true) => TransferType::InData,
            (_, false) => TransferType::OutData,
        };
        ring.enqueue(Trb::setup_stage(&request, transfer_type))?;
        if length > 0 {
            ring.enqueue(Trb::data_stage(buffer, length as u32, direction_in))?;
        }
        // 상태 단계 방향은 데이터 단계의 반대 (데이터가 없으면 IN)
        let status_in = length == 0 || !direction_in;
        let status_trb = ring.enqueue(Trb::status_stage(status_in, true))?;

        self.host.ring_doorbell(slot_id, EP0_DCI);
        self.enumeration_mut(port_id)?.control = Some(PendingControl {
            step,
            status_trb,
            length: request.length,
        });
        Ok(())
    }

    /// EP0 Transfer Event 처리
    pub(super) fn on_control_event(&mut self, event: TransferEvent) {
        let Some(port_id) = self.port_for_slot(event.slot_id) else {
            crate::log_debug!("USB: control event for unknown slot {}", event.slot_id);
            return;
        };
        let Some(pending) = self.enumerations.get(&port_id).and_then(|e| e.control) else {
            return;
        };

        if !event.completion_code.is_success() {
            if let Some(enumeration) = self.enumerations.get_mut(&port_id) {
                enumeration.control = None;
            }
            if pending.step == ControlStep::SetProtocol {
                crate::log_warn!(
                    "USB port {}: SET_PROTOCOL failed ({:?}), using device default",
                    port_id,
                    event.completion_code
                );
                return;
            }
            self.fail_enumeration(port_id, UsbError::CommandCompletionError(event.completion_code));
            return;
        }
        if event.trb_pointer != pending.status_trb {
            return;
        }
        if let Some(enumeration) = self.enumerations.get_mut(&port_id) {
            enumeration.control = None;
        }

        let result = match pending.step {
            ControlStep::DeviceDescriptorHeader => self.on_device_descriptor_header(port_id),
            ControlStep::DeviceDescriptor => self.on_device_descriptor(port_id),
            ControlStep::ConfigurationHeader => self.on_configuration_header(port_id),
            ControlStep::ConfigurationDescriptor => self.on_configuration_descriptor(port_id, pending.length),
            ControlStep::SetConfiguration => self.attach_class_driver(port_id),
            ControlStep::SetProtocol => {
                crate::log_debug!("USB port {}: boot protocol selected", port_id);
                Ok(())
            }
        };
        if let Err(error) = result {
            self.fail_enumeration(port_id, error);
        }
    }

    /// 제어 버퍼에서 `length` 바이트 읽기
    fn read_control_buffer(&self, port_id: u8, length: usize) -> Result<alloc::vec::Vec<u8>, UsbError> {
        let handle = self.enumeration_slot(port_id)?;
        let slot = self
            .slots
            .get(handle)
            .ok_or(UsbError::SlotNotFound(handle.slot_id()))?;
        let mut bytes = vec![0u8; length.min(slot.control_buffer().len())];
        slot.control_buffer().copy_to(&mut bytes);
        Ok(bytes)
    }

    fn on_device_descriptor(&mut self, port_id: u8) -> Result<(), UsbError> {
        let bytes = self.read_control_buffer(port_id, DeviceDescriptor::LENGTH)?;
        let descriptor = DeviceDescriptor::parse(&bytes)?;
        crate::log_info!(
            "USB port {}: device {:04x}:{:04x} (USB {:x}.{:02x})",
            port_id,
            descriptor.vendor_id,
            descriptor.product_id,
            descriptor.usb_version >> 8,
            descriptor.usb_version & 0xFF
        );
        self.enumeration_mut(port_id)?.device_descriptor = Some(descriptor);

        self.control_transfer(
            port_id,
            ControlStep::ConfigurationHeader,
            SetupPacket::get_descriptor(
                DescriptorType::Configuration,
                0,
                ConfigurationDescriptor::LENGTH as u16,
            ),
        )
    }

    /// 구성 디스크립터 헤더로 전체 길이를 알아낸 뒤 전체를 읽음
    fn on_configuration_header(&mut self, port_id: u8) -> Result<(), UsbError> {
        let bytes = self.read_control_buffer(port_id, ConfigurationDescriptor::LENGTH)?;
        let header = ConfigurationDescriptor::parse(&bytes)?;
        if (header.total_length as usize) < ConfigurationDescriptor::LENGTH {
            return Err(UsbError::InvalidDescriptor);
        }
        let length = (header.total_length as usize).min(self.config.control_buffer_size) as u16;
        if length < header.total_length {
            crate::log_warn!(
                "USB port {}: configuration truncated to {} of {} bytes",
                port_id,
                length,
                header.total_length
            );
        }

        self.control_transfer(
            port_id,
            ControlStep::ConfigurationDescriptor,
            SetupPacket::get_descriptor(DescriptorType::Configuration, 0, length),
        )
    }

    /// 구성 전체에서 클래스 드라이버가 인식하는 첫 부트 인터페이스 선택
    fn on_configuration_descriptor(&mut self, port_id: u8, length: u16) -> Result<(), UsbError> {
        let bytes = self.read_control_buffer(port_id, length as usize)?;
        let configuration = ConfigurationDescriptor::parse(&bytes)?;

        let binding = find_hid_boot_interfaces(&bytes)?
            .into_iter()
            .find_map(|(interface, endpoint)| {
                hid::recognize(&interface).map(|kind| InterfaceBinding {
                    kind,
                    interface,
                    endpoint,
                    configuration_value: configuration.configuration_value,
                })
            })
            .ok_or(UsbError::UnrecognizedInterface)?;

        crate::log_info!(
            "USB port {}: {:?} on interface {} (endpoint {:#04x}, {} bytes)",
            port_id,
            binding.kind,
            binding.interface.interface_number,
            binding.endpoint.endpoint_address,
            binding.endpoint.packet_size()
        );

        let enumeration = self.enumeration_mut(port_id)?;
        enumeration.binding = Some(binding);
        enumeration.advance(EnumerationState::InterfaceDiscovered)?;
        self.configure_endpoints(port_id)
    }

    /// Interrupt IN 엔드포인트의 Transfer Ring을 만들고 Configure Endpoint 발행
    fn configure_endpoints(&mut self, port_id: u8) -> Result<(), UsbError> {
        let binding = self
            .enumerations
            .get(&port_id)
            .and_then(|e| e.binding)
            .ok_or(UsbError::NotInitialized)?;
        let handle = self.enumeration_slot(port_id)?;
        let slot_id = handle.slot_id();
        let endpoint_dci = binding.endpoint_dci();
        let max_packet_size = binding.endpoint.packet_size();
        let ring_size = self.config.transfer_ring_size;

        let slot = self
            .slots
            .get_mut(handle)
            .ok_or(UsbError::SlotNotFound(slot_id))?;
        let speed = slot.speed();
        let input_phys = slot.input_context_phys();
        let ring = slot.add_endpoint(endpoint_dci, ring_size)?;
        let (ring_base, ring_cycle) = (ring.base_phys(), ring.cycle_state());

        let input = self
            .slots
            .input_context_for(slot_id)
            .ok_or(UsbError::SlotNotFound(slot_id))?;
        input.control.clear();
        input.control.set_add_flag(0);
        input.control.set_add_flag(endpoint_dci);
        let entries = input.slot.context_entries().max(endpoint_dci);
        input.slot.set_context_entries(entries);

        let endpoint = input
            .endpoint_mut(endpoint_dci)
            .ok_or(UsbError::InvalidParameter)?;
        *endpoint = EndpointContext::default();
        endpoint.set_endpoint_type(EndpointType::InterruptIn);
        endpoint.set_max_packet_size(max_packet_size);
        endpoint.set_error_count(ERROR_COUNT);
        endpoint.set_interval(interrupt_interval(speed, binding.endpoint.interval));
        endpoint.set_tr_dequeue_pointer(ring_base, ring_cycle);
        endpoint.set_average_trb_length(max_packet_size);
        endpoint.set_max_esit_payload(max_packet_size);

        self.issue_command(
            port_id,
            CommandKind::ConfigureEndpoint,
            Trb::configure_endpoint(input_phys, slot_id),
        )?;
        self.enumeration_mut(port_id)?
            .advance(EnumerationState::EndpointsConfiguring)
    }

    fn on_endpoints_configured(&mut self, port_id: u8, event: CommandCompletionEvent) -> Result<(), UsbError> {
        if !self.in_state(port_id, EnumerationState::EndpointsConfiguring) {
            return Ok(());
        }
        check_completion(event.completion_code)?;
        let enumeration = self.enumeration_mut(port_id)?;
        enumeration.advance(EnumerationState::Configured)?;
        let configuration_value = enumeration
            .binding
            .map(|binding| binding.configuration_value)
            .ok_or(UsbError::NotInitialized)?;

        self.control_transfer(
            port_id,
            ControlStep::SetConfiguration,
            SetupPacket::set_configuration(configuration_value),
        )
    }

    /// 클래스 드라이버 생성, 부트 프로토콜 선택, Interrupt IN 무장
    fn attach_class_driver(&mut self, port_id: u8) -> Result<(), UsbError> {
        let binding = self
            .enumerations
            .get(&port_id)
            .and_then(|e| e.binding)
            .ok_or(UsbError::NotInitialized)?;
        let handle = self.enumeration_slot(port_id)?;
        let interface_number = binding.interface.interface_number;
        let endpoint_dci = binding.endpoint_dci();

        let driver = HidClassDriver::new(
            binding.kind,
            handle,
            interface_number,
            endpoint_dci,
            binding.endpoint.packet_size(),
        )?;
        let ring = self
            .slots
            .get_mut(handle)
            .and_then(|slot| slot.transfer_ring_mut(endpoint_dci))
            .ok_or(UsbError::SlotNotFound(handle.slot_id()))?;
        driver.arm(ring)?;
        self.host.ring_doorbell(handle.slot_id(), endpoint_dci);
        self.drivers.push(driver);

        self.enumeration_mut(port_id)?
            .advance(EnumerationState::ClassDriverAttached)?;
        crate::log_info!(
            "USB port {}: {:?} driver attached to slot {}",
            port_id,
            binding.kind,
            handle.slot_id()
        );

        if let Err(error) = self.control_transfer(
            port_id,
            ControlStep::SetProtocol,
            SetupPacket::set_protocol(interface_number, HidProtocol::Boot),
        ) {
            crate::log_warn!("USB port {}: cannot request boot protocol: {}", port_id, error);
        }
        Ok(())
    }
}
