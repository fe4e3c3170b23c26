//! USB 코어 시스템
//!
//! [`UsbManager`]는 호스트 컨트롤러 하나에 대한 중앙 관리자입니다.
//! Event Ring을 비우며 이벤트를 포트별 열거 상태 머신과 클래스 드라이버로 보내고,
//! 명령은 Command Ring에 넣은 TRB의 물리 주소로 완료 이벤트와 짝짓습니다.
//!
//! 단일 스레드 폴링 루프에서 호출되는 것을 전제로 하며, 어떤 연산도 하드웨어를
//! 기다리며 블록하지 않습니다.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::config::XhciConfig;
use crate::drivers::timer;
use crate::drivers::usb::enumeration::{DeviceEnumeration, EnumerationState};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::hid::{self, ClassDriver, HidClassDriver, ObserverRegistry};
use crate::drivers::usb::host_controller::{PortSpeed, UsbHostController};
use crate::drivers::usb::xhci::regs::XhciRegisters;
use crate::drivers::usb::xhci::ring::{CommandRing, EventRing};
use crate::drivers::usb::xhci::slot::{SlotHandle, SlotManager};
use crate::drivers::usb::xhci::trb::{CommandCompletionEvent, Event, TransferEvent, Trb, TrbType};

/// 명령 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    EnableSlot,
    DisableSlot,
    AddressDevice,
    EvaluateContext,
    ConfigureEndpoint,
}

/// 완료를 기다리는 명령
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub port_id: u8,
    /// 명령 TRB의 슬롯 ID (Enable Slot은 0)
    pub slot_id: u8,
    /// 명령을 낸 열거 시도 번호
    ///
    /// 분리 후 같은 포트에 다시 연결되면 번호가 바뀌므로 이전 시도의
    /// 완료나 타임아웃이 새 디바이스에 적용되지 않습니다.
    pub attempt: u64,
    pub kind: CommandKind,
    pub issued_at_ms: u64,
}

/// USB 매니저
pub struct UsbManager<H: UsbHostController> {
    pub(super) host: H,
    pub(super) config: XhciConfig,
    pub(super) command_ring: CommandRing,
    pub(super) event_ring: EventRing,
    pub(super) slots: SlotManager,
    /// 루트 허브 포트 번호 → 열거 상태
    pub(super) enumerations: BTreeMap<u8, DeviceEnumeration>,
    /// Command TRB 물리 주소 → 명령
    pub(super) pending_commands: BTreeMap<u64, PendingCommand>,
    pub(super) drivers: Vec<HidClassDriver>,
    /// 슬롯이 해제됐지만 Disable Slot 완료 전이라 리포트 버퍼를 유지하는 드라이버
    pub(super) retired_drivers: Vec<HidClassDriver>,
    pub(super) observers: ObserverRegistry,
    /// 마지막으로 부여한 열거 시도 번호
    pub(super) last_attempt: u64,
}

impl<H: UsbHostController> UsbManager<H> {
    /// 링과 슬롯 관리자를 할당해 매니저 생성
    ///
    /// 컨트롤러 레지스터 설정은 호출자가 담당합니다 ([`UsbManager::start`]).
    pub fn new(host: H, config: XhciConfig) -> Result<Self, UsbError> {
        config.validate()?;

        let command_ring = CommandRing::new(config.command_ring_size)?;
        let event_ring = EventRing::new(config.event_ring_size)?;
        let slots = SlotManager::new(&config, host.max_scratchpad_buffers())?;

        crate::log_debug!(
            "USB: command ring {} TRBs, event ring {} TRBs, {} slots",
            config.command_ring_size,
            config.event_ring_size,
            config.max_slots
        );

        Ok(Self {
            host,
            config,
            command_ring,
            event_ring,
            slots,
            enumerations: BTreeMap::new(),
            pending_commands: BTreeMap::new(),
            drivers: Vec::new(),
            retired_drivers: Vec::new(),
            observers: ObserverRegistry::new(),
            last_attempt: 0,
        })
    }

    pub fn config(&self) -> &XhciConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn command_ring(&self) -> &CommandRing {
        &self.command_ring
    }

    pub fn observers_mut(&mut self) -> &mut ObserverRegistry {
        &mut self.observers
    }

    /// 포트의 열거 상태
    pub fn state(&self, port_id: u8) -> Option<EnumerationState> {
        self.enumerations.get(&port_id).map(|e| e.state())
    }

    pub fn enumeration(&self, port_id: u8) -> Option<&DeviceEnumeration> {
        self.enumerations.get(&port_id)
    }

    /// 연결된 클래스 드라이버
    pub fn drivers(&self) -> &[HidClassDriver] {
        &self.drivers
    }

    pub fn pending_command_count(&self) -> usize {
        self.pending_commands.len()
    }

    /// Disable Slot 완료를 기다리는 드라이버 수
    pub fn retired_driver_count(&self) -> usize {
        self.retired_drivers.len()
    }

    /// 컨트롤러 시작 전에 이미 연결돼 있던 디바이스 처리
    pub fn attach_existing_ports(&mut self) {
        for port in 1..=self.host.port_count() {
            if self.host.port_status(port).connected {
                crate::log_info!("USB: device present on port {}", port);
                self.on_port_status_change(port);
            }
        }
    }

    /// Event Ring 비우기
    ///
    /// 처리한 이벤트 수를 반환하며, 하나 이상이면 ERDP를 한 번 갱신합니다.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(trb) = self.event_ring.dequeue() {
            self.handle_event(trb);
            handled += 1;
        }
        if handled > 0 {
            let erdp = self.event_ring.dequeue_pointer();
            self.host.set_event_dequeue(erdp);
        }
        handled
    }

    fn handle_event(&mut self, trb: Trb) {
        match trb.event() {
            Event::PortStatusChange(event) => self.on_port_status_change(event.port_id),
            Event::CommandCompletion(event) => self.on_command_completion(event),
            Event::Transfer(event) => self.on_transfer_event(event),
            Event::Other(raw_type) => {
                crate::log_debug!("USB: ignoring event TRB type {}", raw_type);
            }
        }
    }

    /// 기한이 지난 명령 처리
    ///
    /// 명령을 기다리던 디바이스는 `Timeout`으로 실패하고 슬롯이 해제됩니다.
    /// 처리한 명령 수를 반환합니다.
    pub fn check_timeouts(&mut self, now_ms: u64) -> usize {
        let limit = self.config.command_timeout_ms;
        let expired: Vec<(u64, PendingCommand)> = self
            .pending_commands
            .iter()
            .filter(|(_, cmd)| now_ms.saturating_sub(cmd.issued_at_ms) >= limit)
            .map(|(&ptr, &cmd)| (ptr, cmd))
            .collect();

        for (ptr, command) in &expired {
            self.pending_commands.remove(ptr);
            crate::log_warn!(
                "USB port {}: {:?} command at {:#x} timed out",
                command.port_id,
                command.kind,
                ptr
            );
            if command.kind == CommandKind::DisableSlot {
                // 컨트롤러가 슬롯을 놓았는지 알 수 없으므로 메모리는 회수하지 않음
                crate::log_warn!("USB: slot {} memory kept after lost Disable Slot", command.slot_id);
            } else if self.is_current_attempt(command) {
                self.fail_enumeration(command.port_id, UsbError::Timeout);
            } else {
                crate::log_debug!("USB port {}: timed-out command belonged to a detached device", command.port_id);
            }
        }
        expired.len()
    }

    /// 명령을 낸 열거가 아직 그 포트의 현재 열거인지
    pub(super) fn is_current_attempt(&self, command: &PendingCommand) -> bool {
        self.enumerations
            .get(&command.port_id)
            .map_or(false, |e| e.attempt() == command.attempt)
    }

    /// Command Ring에 명령을 넣고 도어벨 0을 울림
    pub(super) fn issue_command(&mut self, port_id: u8, kind: CommandKind, trb: Trb) -> Result<u64, UsbError> {
        let attempt = self.enumerations.get(&port_id).map_or(0, |e| e.attempt());
        let ptr = self.command_ring.enqueue(trb)?;
        self.pending_commands.insert(
            ptr,
            PendingCommand {
                port_id,
                slot_id: trb.slot_id(),
                attempt,
                kind,
                issued_at_ms: timer::get_milliseconds(),
            },
        );
        self.host.ring_doorbell(0, 0);
        crate::log_trace!("USB port {}: {:?} issued at {:#x}", port_id, kind, ptr);
        Ok(ptr)
    }

    /// 포트 상태 변경 처리
    fn on_port_status_change(&mut self, port_id: u8) {
        self.host.clear_port_change(port_id);
        let status = self.host.port_status(port_id);
        crate::log_debug!("USB port {}: status change {:?}", port_id, status);

        if !status.connected {
            self.detach(port_id);
            return;
        }
        if status.reset_in_progress {
            return;
        }

        let idle = self.enumerations.get(&port_id).map_or(true, |e| {
            matches!(
                e.state(),
                EnumerationState::PortDetected | EnumerationState::EnumerationFailed
            )
        });
        if !idle {
            // 이미 진행 중이거나 연결된 디바이스
            return;
        }

        if status.enabled {
            self.begin_enumeration(port_id, status.speed);
        } else {
            // USB2 포트는 리셋이 끝나야 활성화됨
            self.track_port(port_id, status.speed);
            self.host.reset_port(port_id);
        }
    }

    /// 디바이스 분리
    ///
    /// 슬롯을 해제(Disable Slot + 로컬 해제)하고 클래스 드라이버를 버립니다.
    pub fn detach(&mut self, port_id: u8) {
        if let Some(mut enumeration) = self.enumerations.remove(&port_id) {
            if let Some(handle) = enumeration.take_slot() {
                self.release_device_slot(port_id, handle);
            }
            crate::log_info!("USB port {}: device detached", port_id);
        }
    }

    /// 디바이스 실패 처리: 상태 전이, 로그, 슬롯 해제
    pub(super) fn fail_enumeration(&mut self, port_id: u8, error: UsbError) {
        let Some(enumeration) = self.enumerations.get_mut(&port_id) else {
            return;
        };
        enumeration.fail(error);
        if let Some(handle) = enumeration.take_slot() {
            self.release_device_slot(port_id, handle);
        }
    }

    /// 포트에 새 열거 시도 등록
    pub(super) fn track_port(&mut self, port_id: u8, speed: Option<PortSpeed>) {
        self.last_attempt += 1;
        self.enumerations.insert(
            port_id,
            DeviceEnumeration::new(port_id, speed).with_attempt(self.last_attempt),
        );
    }

    /// 슬롯과 그 슬롯에 묶인 드라이버 해제
    ///
    /// 슬롯은 즉시 무효화되지만 DMA 메모리(컨텍스트, 링, 리포트 버퍼)는
    /// Disable Slot이 완료될 때까지 유지됩니다.
    fn release_device_slot(&mut self, port_id: u8, handle: SlotHandle) {
        let (retired, kept): (Vec<_>, Vec<_>) = core::mem::take(&mut self.drivers)
            .into_iter()
            .partition(|driver| driver.slot() == handle);
        self.drivers = kept;
        if !self.slots.is_current(handle) {
            return;
        }
        if let Err(error) = self.slots.release_slot(handle.slot_id()) {
            crate::log_warn!("USB port {}: slot release failed: {}", port_id, error);
            return;
        }
        self.retired_drivers.extend(retired);
        self.disable_hardware_slot(port_id, handle.slot_id());
    }

    /// Disable Slot 완료 후 슬롯 메모리와 드라이버 회수
    pub(super) fn reclaim_slot(&mut self, slot_id: u8) {
        self.retired_drivers
            .retain(|driver| driver.slot().slot_id() != slot_id);
        if self.slots.is_releasing(slot_id) {
            if let Err(error) = self.slots.reclaim_slot(slot_id) {
                crate::log_warn!("USB: cannot reclaim slot {}: {}", slot_id, error);
            }
        }
    }

    /// 짝이 없는 명령 완료 처리
    ///
    /// 타임아웃으로 잊은 Enable Slot이 뒤늦게 성공했다면 받은 슬롯을 돌려줍니다.
    pub(super) fn on_orphan_completion(&mut self, event: CommandCompletionEvent) {
        crate::log_debug!(
            "USB: completion for unknown command {:#x} ({:?})",
            event.command_trb_pointer,
            event.completion_code
        );
        let kind = self
            .command_ring
            .trb_at(event.command_trb_pointer)
            .and_then(|trb| trb.trb_type());
        if kind == Some(TrbType::EnableSlot) && event.completion_code.is_success() {
            self.disable_hardware_slot(0, event.slot_id);
        }
    }

    /// 컨트롤러 쪽 슬롯 비활성화
    pub(super) fn disable_hardware_slot(&mut self, port_id: u8, slot_id: u8) {
        if let Err(error) = self.issue_command(port_id, CommandKind::DisableSlot, Trb::disable_slot(slot_id)) {
            crate::log_warn!("USB port {}: cannot disable slot {}: {}", port_id, slot_id, error);
        }
    }

    /// Transfer Event 처리
    fn on_transfer_event(&mut self, event: TransferEvent) {
        let Some(slot) = self.slots.slot_mut(event.slot_id) else {
            crate::log_debug!("USB: transfer event for inactive slot {}", event.slot_id);
            return;
        };
        if let Some(ring) = slot.transfer_ring_mut(event.endpoint_id) {
            ring.advance_dequeue(event.trb_pointer);
        }

        if event.endpoint_id == crate::drivers::usb::xhci::context::EP0_DCI {
            self.on_control_event(event);
        } else {
            self.on_report_event(event);
        }
    }

    /// Interrupt IN 전송 완료를 클래스 드라이버로 전달
    fn on_report_event(&mut self, event: TransferEvent) {
        let Some(driver) = self.drivers.iter_mut().find(|driver| {
            driver.slot().slot_id() == event.slot_id && driver.endpoint_dci() == event.endpoint_id
        }) else {
            crate::log_debug!(
                "USB: no driver for slot {} endpoint {}",
                event.slot_id,
                event.endpoint_id
            );
            return;
        };

        if !event.completion_code.is_success() {
            crate::log_warn!(
                "USB slot {} endpoint {}: report transfer failed ({:?})",
                event.slot_id,
                event.endpoint_id,
                event.completion_code
            );
            return;
        }

        let received = driver
            .report_buffer()
            .len()
            .saturating_sub(event.residual_length as usize);
        match hid::dispatch(driver, &mut self.slots, &self.observers, received) {
            Ok(true) => self.host.ring_doorbell(event.slot_id, event.endpoint_id),
            Ok(false) => {}
            Err(error) => {
                crate::log_warn!("USB slot {}: cannot re-arm endpoint: {}", event.slot_id, error);
            }
        }
    }
}

impl UsbManager<XhciRegisters> {
    /// DCBAA, Command Ring, Event Ring을 컨트롤러에 등록하고 시작
    ///
    /// # Safety
    /// 컨트롤러는 [`XhciRegisters::reset`]으로 리셋된 상태여야 합니다.
    pub unsafe fn start(&mut self) -> Result<(), UsbError> {
        let enabled_slots = self.config.max_slots.min(self.host.max_device_slots());
        let dcbaa = self.slots.dcbaa_phys();
        let command_ring = self.command_ring.dequeue_pointer();
        let erst = self.event_ring.erst_phys();
        let erst_size = self.event_ring.erst_size();
        let erdp = self.event_ring.dequeue_pointer();
        self.host
            .start(enabled_slots, dcbaa, command_ring, erst, erst_size, erdp)
    }
}

#[cfg(test)]
impl<H: UsbHostController> UsbManager<H> {
    pub(crate) fn event_ring_mut(&mut self) -> &mut EventRing {
        &mut self.event_ring
    }
}
