//! 테스트용 xHCI 컨트롤러 시뮬레이터
//!
//! [`SimController`]는 포트/도어벨 레지스터를, [`SimHardware`]는 컨트롤러 내부
//! (Command/Transfer Ring 소비, Event Ring 생산, 디바이스 응답)를 흉내 냅니다.
//! 호스트 테스트에서는 물리 주소와 가상 주소가 같으므로 TRB가 가리키는 버퍼에
//! 직접 씁니다.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use crate::config::XhciConfig;
use crate::drivers::usb::core::UsbManager;
use crate::drivers::usb::descriptor::DescriptorType;
use crate::drivers::usb::host_controller::{PortSpeed, PortStatus, UsbHostController};
use crate::drivers::usb::request::SetupPacket;
use crate::drivers::usb::xhci::context::{DeviceContext, SlotState, EP0_DCI};
use crate::drivers::usb::xhci::ring::{EventProducer, HardwareCursor};
use crate::drivers::usb::xhci::trb::{
    CommandCompletionEvent, CompletionCode, PortStatusChangeEvent, TransferEvent, Trb, TrbType,
};

/// 부트 키보드 디바이스 디스크립터 (046d:c31c, EP0 8바이트)
pub(crate) const DEVICE_DESCRIPTOR: [u8; 18] = [
    18, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 8, 0x6D, 0x04, 0x1C, 0xC3, 0x00, 0x01, 1, 2, 0, 1,
];

/// 키보드 구성: 인터페이스 0, EP 0x81, 8바이트, bInterval 10
pub(crate) const KEYBOARD_CONFIGURATION: [u8; 34] = [
    9, 0x02, 34, 0, 1, 1, 0, 0xA0, 50, //
    9, 0x04, 0, 0, 1, 0x03, 0x01, 0x01, 0, //
    9, 0x21, 0x11, 0x01, 0, 1, 0x22, 63, 0, //
    7, 0x05, 0x81, 0x03, 8, 0, 10,
];

/// 마우스 구성: 인터페이스 0, EP 0x81, 4바이트
pub(crate) const MOUSE_CONFIGURATION: [u8; 34] = [
    9, 0x02, 34, 0, 1, 1, 0, 0xA0, 50, //
    9, 0x04, 0, 0, 1, 0x03, 0x01, 0x02, 0, //
    9, 0x21, 0x11, 0x01, 0, 1, 0x22, 52, 0, //
    7, 0x05, 0x81, 0x03, 4, 0, 10,
];

/// 벤더 전용 인터페이스만 있는 구성
pub(crate) const VENDOR_CONFIGURATION: [u8; 25] = [
    9, 0x02, 25, 0, 1, 1, 0, 0x80, 50, //
    9, 0x04, 0, 0, 1, 0xFF, 0x00, 0x00, 0, //
    7, 0x05, 0x81, 0x02, 64, 0, 0,
];

/// 레지스터 쪽 시뮬레이터
#[derive(Debug, Default)]
pub(crate) struct SimController {
    pub ports: Vec<PortStatus>,
    pub doorbells: Vec<(u8, u8)>,
    /// 리셋이 요청됐지만 아직 PSC를 보내지 않은 포트
    pub pending_resets: Vec<u8>,
    pub resets: Vec<u8>,
    pub erdp: u64,
    pub scratchpads: u16,
}

impl SimController {
    pub fn new(port_count: u8) -> Self {
        Self {
            ports: alloc::vec![PortStatus::default(); port_count as usize],
            ..Self::default()
        }
    }

    fn port_mut(&mut self, port: u8) -> Option<&mut PortStatus> {
        self.ports.get_mut((port as usize).checked_sub(1)?)
    }

    pub fn connect(&mut self, port: u8, speed: PortSpeed, enabled: bool) {
        if let Some(status) = self.port_mut(port) {
            *status = PortStatus {
                connected: true,
                enabled,
                reset_in_progress: false,
                speed: Some(speed),
            };
        }
    }

    pub fn disconnect(&mut self, port: u8) {
        if let Some(status) = self.port_mut(port) {
            *status = PortStatus::default();
        }
    }

    pub fn take_doorbells(&mut self) -> Vec<(u8, u8)> {
        core::mem::take(&mut self.doorbells)
    }
}

impl UsbHostController for SimController {
    fn port_count(&self) -> u8 {
        self.ports.len() as u8
    }

    fn port_status(&self, port: u8) -> PortStatus {
        (port as usize)
            .checked_sub(1)
            .and_then(|i| self.ports.get(i))
            .copied()
            .unwrap_or_default()
    }

    fn reset_port(&mut self, port: u8) {
        self.resets.push(port);
        if let Some(status) = self.port_mut(port) {
            if status.connected {
                status.enabled = true;
            }
        }
        self.pending_resets.push(port);
    }

    fn clear_port_change(&mut self, _port: u8) {}

    fn ring_doorbell(&mut self, slot_id: u8, target: u8) {
        self.doorbells.push((slot_id, target));
    }

    fn set_event_dequeue(&mut self, erdp: u64) {
        self.erdp = erdp;
    }

    fn max_scratchpad_buffers(&self) -> u16 {
        self.scratchpads
    }
}

/// 무장된 Normal TRB
#[derive(Debug, Clone, Copy)]
struct ArmedTransfer {
    trb_pointer: u64,
    buffer: u64,
    length: u32,
}

/// 링 하나를 따라가는 컨트롤러 쪽 커서
#[derive(Debug, Clone, Copy)]
struct EndpointCursor {
    ring_base: u64,
    cursor: HardwareCursor,
}

/// 컨트롤러 내부 동작 시뮬레이터
pub(crate) struct SimHardware {
    command_cursor: HardwareCursor,
    endpoints: BTreeMap<(u8, u8), EndpointCursor>,
    armed: BTreeMap<(u8, u8), VecDeque<ArmedTransfer>>,
    events: EventProducer,
    next_slot_ids: VecDeque<u8>,
    next_address: u8,
    held: Vec<Trb>,
    /// 명령 완료 이벤트를 보류 (재정렬 테스트)
    pub hold_command_completions: bool,
    /// 소비하되 완료를 보내지 않을 명령 타입 (타임아웃 테스트)
    pub swallow: Vec<TrbType>,
    /// 제어 전송에 STALL로 응답할 슬롯
    pub stall_slots: Vec<u8>,
    /// 슬롯별 구성 디스크립터 (없으면 키보드)
    pub configurations: BTreeMap<u8, Vec<u8>>,
    /// 슬롯별 디바이스 bMaxPacketSize0 (없으면 8)
    pub ep0_packet_sizes: BTreeMap<u8, u8>,
    /// 컨트롤러가 알고 있는 슬롯별 EP0 최대 패킷 크기
    ep0_limits: BTreeMap<u8, u16>,
    /// 처리한 명령 (타입, 슬롯 ID)
    pub commands: Vec<(TrbType, u8)>,
    /// 받은 제어 요청 (슬롯 ID, 요청)
    pub requests: Vec<(u8, SetupPacket)>,
}

impl SimHardware {
    pub fn new() -> Self {
        Self {
            command_cursor: HardwareCursor::new(),
            endpoints: BTreeMap::new(),
            armed: BTreeMap::new(),
            events: EventProducer::new(),
            next_slot_ids: VecDeque::new(),
            next_address: 1,
            held: Vec::new(),
            hold_command_completions: false,
            swallow: Vec::new(),
            stall_slots: Vec::new(),
            configurations: BTreeMap::new(),
            ep0_packet_sizes: BTreeMap::new(),
            ep0_limits: BTreeMap::new(),
            commands: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Enable Slot에 차례로 배정할 슬롯 ID
    pub fn queue_slot_ids(&mut self, ids: &[u8]) {
        self.next_slot_ids.extend(ids.iter().copied());
    }

    pub fn set_configuration(&mut self, slot_id: u8, configuration: &[u8]) {
        self.configurations.insert(slot_id, configuration.to_vec());
    }

    fn post(&mut self, usb: &mut UsbManager<SimController>, trb: Trb) {
        self.events.push(usb.event_ring_mut(), trb);
    }

    /// Port Status Change 이벤트 전송
    pub fn port_change(&mut self, usb: &mut UsbManager<SimController>, port_id: u8) {
        let event = PortStatusChangeEvent {
            port_id,
            completion_code: CompletionCode::Success,
        };
        self.post(usb, event.to_trb());
    }

    /// 활성화된 포트에 디바이스 연결
    pub fn attach(&mut self, usb: &mut UsbManager<SimController>, port_id: u8, speed: PortSpeed) {
        usb.host_mut().connect(port_id, speed, true);
        self.port_change(usb, port_id);
    }

    pub fn detach(&mut self, usb: &mut UsbManager<SimController>, port_id: u8) {
        usb.host_mut().disconnect(port_id);
        self.port_change(usb, port_id);
    }

    /// 보류한 명령 완료를 역순으로 전송
    pub fn release_held_reversed(&mut self, usb: &mut UsbManager<SimController>) {
        let held = core::mem::take(&mut self.held);
        for trb in held.into_iter().rev() {
            self.post(usb, trb);
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// 도어벨과 이벤트가 없을 때까지 처리
    ///
    /// 매니저가 처리한 이벤트 수를 반환합니다.
    pub fn run(&mut self, usb: &mut UsbManager<SimController>) -> usize {
        let mut handled = 0;
        loop {
            let resets = core::mem::take(&mut usb.host_mut().pending_resets);
            for port in resets {
                self.port_change(usb, port);
            }
            let doorbells = usb.host_mut().take_doorbells();
            for (slot_id, target) in doorbells {
                if slot_id == 0 {
                    self.process_commands(usb);
                } else if target == EP0_DCI {
                    self.process_control(usb, slot_id);
                } else {
                    self.collect_normal(usb, slot_id, target);
                }
            }

            let n = usb.poll();
            handled += n;
            let host = usb.host();
            if n == 0 && host.doorbells.is_empty() && host.pending_resets.is_empty() {
                return handled;
            }
        }
    }

    fn process_commands(&mut self, usb: &mut UsbManager<SimController>) {
        let mut fetched = Vec::new();
        while let Some(entry) = self.command_cursor.dequeue(usb.command_ring()) {
            fetched.push(entry);
        }

        for (pointer, trb) in fetched {
            let Some(kind) = trb.trb_type() else {
                continue;
            };
            self.commands.push((kind, trb.slot_id()));
            if self.swallow.contains(&kind) {
                continue;
            }

            let (completion_code, slot_id) = match kind {
                TrbType::EnableSlot => match self.next_slot_ids.pop_front() {
                    Some(id) => (CompletionCode::Success, id),
                    None => (CompletionCode::NoSlotsAvailable, 0),
                },
                TrbType::AddressDevice => {
                    self.write_address(usb, trb.slot_id());
                    self.load_ep0_limit(usb, trb.slot_id());
                    (CompletionCode::Success, trb.slot_id())
                }
                TrbType::EvaluateContext => {
                    self.load_ep0_limit(usb, trb.slot_id());
                    (CompletionCode::Success, trb.slot_id())
                }
                TrbType::DisableSlot => {
                    let slot_id = trb.slot_id();
                    self.endpoints.retain(|&(id, _), _| id != slot_id);
                    self.armed.retain(|&(id, _), _| id != slot_id);
                    self.ep0_limits.remove(&slot_id);
                    (CompletionCode::Success, slot_id)
                }
                _ => (CompletionCode::Success, trb.slot_id()),
            };

            let event = CommandCompletionEvent {
                command_trb_pointer: pointer,
                completion_code,
                slot_id,
            }
            .to_trb();
            if self.hold_command_completions {
                self.held.push(event);
            } else {
                self.post(usb, event);
            }
        }
    }

    /// Address Device 결과를 출력 컨텍스트에 기록
    fn write_address(&mut self, usb: &UsbManager<SimController>, slot_id: u8) {
        let Some(slot) = usb.slots().slot(slot_id) else {
            return;
        };
        let output = slot.output_context_phys() as *mut DeviceContext;
        let address = self.next_address;
        self.next_address = self.next_address.wrapping_add(1);
        // SAFETY: 호스트 테스트에서 물리 주소 = 가상 주소이며 출력 컨텍스트는 살아 있습니다.
        unsafe {
            (*output).slot.set_usb_device_address(address);
            (*output).slot.set_slot_state(SlotState::Addressed);
        }
    }

    /// 입력 컨텍스트의 EP0 최대 패킷 크기를 컨트롤러 쪽에 반영
    fn load_ep0_limit(&mut self, usb: &UsbManager<SimController>, slot_id: u8) {
        let Some(input) = usb.slots().slot(slot_id).map(|slot| slot.input_context()) else {
            return;
        };
        if input.control.add_flags() & (1 << EP0_DCI) == 0 {
            return;
        }
        if let Some(ep0) = input.endpoint(EP0_DCI) {
            self.ep0_limits.insert(slot_id, ep0.max_packet_size());
        }
    }

    fn device_packet_size(&self, slot_id: u8) -> u8 {
        self.ep0_packet_sizes
            .get(&slot_id)
            .copied()
            .unwrap_or(DEVICE_DESCRIPTOR[7])
    }

    /// 첫 데이터 패킷이 컨트롤러의 EP0 한도를 넘는지
    fn babbles(&self, slot_id: u8, sent: usize) -> bool {
        let limit = self.ep0_limits.get(&slot_id).copied().unwrap_or(8) as usize;
        sent.min(self.device_packet_size(slot_id) as usize) > limit
    }

    /// 엔드포인트 링에서 새 TRB 꺼내기
    fn fetch(&mut self, usb: &UsbManager<SimController>, slot_id: u8, dci: u8) -> Vec<(u64, Trb)> {
        let Some(ring) = usb
            .slots()
            .slot(slot_id)
            .and_then(|slot| slot.transfer_ring(dci))
        else {
            return Vec::new();
        };

        // 슬롯이 재할당되면 링도 새로 만들어지므로 커서를 다시 시작
        let entry = self
            .endpoints
            .entry((slot_id, dci))
            .or_insert(EndpointCursor {
                ring_base: ring.base_phys(),
                cursor: HardwareCursor::new(),
            });
        if entry.ring_base != ring.base_phys() {
            *entry = EndpointCursor {
                ring_base: ring.base_phys(),
                cursor: HardwareCursor::new(),
            };
        }

        let mut fetched = Vec::new();
        while let Some(item) = entry.cursor.dequeue(ring) {
            fetched.push(item);
        }
        fetched
    }

    fn process_control(&mut self, usb: &mut UsbManager<SimController>, slot_id: u8) {
        let mut request = None;
        let mut data: Option<(u64, u32)> = None;

        for (pointer, trb) in self.fetch(usb, slot_id, EP0_DCI) {
            match trb.trb_type() {
                Some(TrbType::SetupStage) => {
                    request = Some(SetupPacket::from_bytes(trb.parameter.to_le_bytes()));
                    data = None;
                }
                Some(TrbType::DataStage) => data = Some((trb.parameter, trb.transfer_length())),
                Some(TrbType::StatusStage) => {
                    let Some(setup) = request.take() else {
                        continue;
                    };
                    self.requests.push((slot_id, setup));
                    let completion_code = if self.stall_slots.contains(&slot_id) {
                        CompletionCode::StallError
                    } else if let Some((buffer, length)) = data.take() {
                        let sent = self.respond(slot_id, &setup, buffer, length);
                        if self.babbles(slot_id, sent) {
                            CompletionCode::BabbleDetected
                        } else {
                            CompletionCode::Success
                        }
                    } else {
                        CompletionCode::Success
                    };
                    let event = TransferEvent {
                        trb_pointer: pointer,
                        residual_length: 0,
                        completion_code,
                        endpoint_id: EP0_DCI,
                        slot_id,
                    };
                    self.post(usb, event.to_trb());
                }
                _ => {}
            }
        }
    }

    /// GET_DESCRIPTOR 응답을 데이터 버퍼에 기록
    ///
    /// 보낸 바이트 수를 반환합니다.
    fn respond(&self, slot_id: u8, setup: &SetupPacket, buffer: u64, length: u32) -> usize {
        let descriptor_type = (setup.value >> 8) as u8;
        let mut device = DEVICE_DESCRIPTOR;
        device[7] = self.device_packet_size(slot_id);
        let response: &[u8] = match DescriptorType::from_raw(descriptor_type) {
            Some(DescriptorType::Device) => &device,
            Some(DescriptorType::Configuration) => self
                .configurations
                .get(&slot_id)
                .map_or(&KEYBOARD_CONFIGURATION[..], |c| c.as_slice()),
            _ => return 0,
        };
        let n = response.len().min(length as usize);
        // SAFETY: 버퍼는 드라이버가 할당한 제어 버퍼이며 length 바이트 이상입니다.
        unsafe { core::ptr::copy_nonoverlapping(response.as_ptr(), buffer as *mut u8, n) };
        n
    }

    fn collect_normal(&mut self, usb: &UsbManager<SimController>, slot_id: u8, dci: u8) {
        for (pointer, trb) in self.fetch(usb, slot_id, dci) {
            if trb.trb_type() == Some(TrbType::Normal) {
                self.armed
                    .entry((slot_id, dci))
                    .or_default()
                    .push_back(ArmedTransfer {
                        trb_pointer: pointer,
                        buffer: trb.parameter,
                        length: trb.transfer_length(),
                    });
            }
        }
    }

    /// 무장된 Normal TRB 수
    pub fn armed_count(&self, slot_id: u8, dci: u8) -> usize {
        self.armed.get(&(slot_id, dci)).map_or(0, VecDeque::len)
    }

    /// 디바이스가 Interrupt IN 리포트를 보냄
    ///
    /// 무장된 TRB가 없으면 false.
    pub fn send_report(&mut self, usb: &mut UsbManager<SimController>, slot_id: u8, dci: u8, report: &[u8]) -> bool {
        let Some(transfer) = self
            .armed
            .get_mut(&(slot_id, dci))
            .and_then(VecDeque::pop_front)
        else {
            return false;
        };

        let n = report.len().min(transfer.length as usize);
        // SAFETY: 버퍼는 드라이버의 리포트 버퍼이며 transfer.length 바이트입니다.
        unsafe { core::ptr::copy_nonoverlapping(report.as_ptr(), transfer.buffer as *mut u8, n) };
        let completion_code = if n < transfer.length as usize {
            CompletionCode::ShortPacket
        } else {
            CompletionCode::Success
        };
        let event = TransferEvent {
            trb_pointer: transfer.trb_pointer,
            residual_length: transfer.length - n as u32,
            completion_code,
            endpoint_id: dci,
            slot_id,
        };
        self.post(usb, event.to_trb());
        true
    }
}

/// 시뮬레이터에 연결된 매니저
pub(crate) fn manager(port_count: u8) -> (UsbManager<SimController>, SimHardware) {
    let usb = UsbManager::new(SimController::new(port_count), XhciConfig::DEFAULT)
        .expect("manager allocation");
    (usb, SimHardware::new())
}
