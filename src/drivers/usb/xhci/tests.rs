//! 시뮬레이터를 사용한 드라이버 코어 시나리오 테스트

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use super::context::{EndpointType, EP0_DCI};
use super::sim::{self, MOUSE_CONFIGURATION, VENDOR_CONFIGURATION};
use super::trb::{CompletionCode, TrbType};
use crate::drivers::timer;
use crate::drivers::usb::descriptor::DescriptorType;
use crate::drivers::usb::enumeration::{EnumerationFailure, EnumerationState};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::hid::{
    ClassDriver, ClassDriverKind, KeyboardObserver, MouseObserver, MouseReport, RawKeyEvent,
};
use crate::drivers::usb::host_controller::PortSpeed;
use crate::drivers::usb::request::{HidProtocol, SetupPacket};

const KEYBOARD_DCI: u8 = 3;

#[derive(Default)]
struct KeyLog(Vec<RawKeyEvent>);

impl KeyboardObserver for KeyLog {
    fn on_key_event(&mut self, event: &RawKeyEvent) {
        self.0.push(*event);
    }
}

#[derive(Default)]
struct MotionLog(Vec<MouseReport>);

impl MouseObserver for MotionLog {
    fn on_mouse_event(&mut self, report: &MouseReport) {
        self.0.push(*report);
    }
}

#[test]
fn keyboard_enumerates_to_class_driver() {
    let (mut usb, mut hw) = sim::manager(2);
    hw.queue_slot_ids(&[3]);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    assert_eq!(usb.pending_command_count(), 0);

    assert_eq!(usb.drivers().len(), 1);
    let driver = &usb.drivers()[0];
    assert_eq!(driver.kind(), ClassDriverKind::Keyboard);
    assert_eq!(driver.slot().slot_id(), 3);
    assert_eq!(driver.interface_number(), 0);
    assert_eq!(driver.in_packet_size(), 8);
    assert_eq!(driver.endpoint_dci(), KEYBOARD_DCI);
    assert!(driver.as_keyboard().is_some());

    let enumeration = usb.enumeration(1).unwrap();
    assert_eq!(enumeration.slot().map(|h| h.slot_id()), Some(3));
    assert_eq!(enumeration.device_descriptor().map(|d| d.vendor_id), Some(0x046D));
    assert!(enumeration.failure().is_none());

    assert_eq!(
        hw.commands,
        [
            (TrbType::EnableSlot, 0),
            (TrbType::AddressDevice, 3),
            (TrbType::ConfigureEndpoint, 3),
        ]
    );
    let requests: Vec<SetupPacket> = hw.requests.iter().map(|&(_, r)| r).collect();
    assert_eq!(
        requests,
        [
            SetupPacket::get_descriptor(DescriptorType::Device, 0, 8),
            SetupPacket::get_descriptor(DescriptorType::Device, 0, 18),
            SetupPacket::get_descriptor(DescriptorType::Configuration, 0, 9),
            SetupPacket::get_descriptor(DescriptorType::Configuration, 0, 34),
            SetupPacket::set_configuration(1),
            SetupPacket::set_protocol(0, HidProtocol::Boot),
        ]
    );
    assert!(hw.requests.iter().all(|&(slot_id, _)| slot_id == 3));

    // Configure Endpoint 입력 컨텍스트
    let slot = usb.slots().slot(3).unwrap();
    let input = slot.input_context();
    assert_eq!(input.control.add_flags(), (1 << 0) | (1 << KEYBOARD_DCI));
    assert_eq!(input.slot.root_hub_port(), 1);
    assert_eq!(input.slot.speed(), PortSpeed::Full as u8);
    assert_eq!(input.slot.context_entries(), KEYBOARD_DCI);
    let endpoint = input.endpoint(KEYBOARD_DCI).unwrap();
    assert_eq!(endpoint.endpoint_type(), EndpointType::InterruptIn);
    assert_eq!(endpoint.max_packet_size(), 8);
    assert_eq!(endpoint.interval(), 6);
    assert_eq!(
        endpoint.tr_dequeue_pointer(),
        slot.transfer_ring(KEYBOARD_DCI).unwrap().base_phys()
    );
    assert!(endpoint.dequeue_cycle_state());

    assert_eq!(slot.output_context().slot.usb_device_address(), 1);
    assert_eq!(hw.armed_count(3, KEYBOARD_DCI), 1);
    assert_ne!(usb.host().erdp, 0);
}

#[test]
fn reversed_enable_slot_completions_match_by_pointer() {
    let (mut usb, mut hw) = sim::manager(2);
    hw.queue_slot_ids(&[5, 6]);
    hw.hold_command_completions = true;

    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.attach(&mut usb, 2, PortSpeed::Full);
    hw.run(&mut usb);
    assert_eq!(hw.held_count(), 2);
    assert_eq!(usb.pending_command_count(), 2);
    assert_eq!(usb.state(1), Some(EnumerationState::SlotEnabling));
    assert_eq!(usb.state(2), Some(EnumerationState::SlotEnabling));

    // 포트 2의 완료가 먼저 도착
    hw.hold_command_completions = false;
    hw.release_held_reversed(&mut usb);
    hw.run(&mut usb);

    for port in [1, 2] {
        assert_eq!(usb.state(port), Some(EnumerationState::ClassDriverAttached));
    }
    // 첫 번째로 발행된 명령(포트 1)이 첫 번째 슬롯 ID를 받음
    assert_eq!(usb.enumeration(1).and_then(|e| e.slot()).map(|h| h.slot_id()), Some(5));
    assert_eq!(usb.enumeration(2).and_then(|e| e.slot()).map(|h| h.slot_id()), Some(6));
    assert_eq!(usb.slots().slot(5).map(|s| s.port_id()), Some(1));
    assert_eq!(usb.slots().slot(6).map(|s| s.port_id()), Some(2));
    assert_eq!(usb.drivers().len(), 2);
}

#[test]
fn stalled_device_fails_without_affecting_others() {
    let (mut usb, mut hw) = sim::manager(2);
    hw.queue_slot_ids(&[1, 2]);
    hw.stall_slots.push(2);

    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.attach(&mut usb, 2, PortSpeed::Low);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    assert_eq!(usb.state(2), Some(EnumerationState::EnumerationFailed));
    assert_eq!(
        usb.enumeration(2).and_then(|e| e.failure()),
        Some(&EnumerationFailure {
            state: EnumerationState::DescriptorReading,
            error: UsbError::CommandCompletionError(CompletionCode::StallError),
        })
    );

    // 실패한 디바이스의 슬롯은 해제되고 컨트롤러에도 반납됨
    assert!(usb.slots().slot(2).is_none());
    assert!(usb.enumeration(2).and_then(|e| e.slot()).is_none());
    assert!(hw.commands.contains(&(TrbType::DisableSlot, 2)));
    assert_eq!(usb.drivers().len(), 1);
    assert_eq!(usb.drivers()[0].slot().slot_id(), 1);
}

#[test]
fn unanswered_command_times_out_and_releases_slot() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[2]);
    hw.swallow.push(TrbType::AddressDevice);

    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);
    assert_eq!(usb.state(1), Some(EnumerationState::AddressingDevice));
    assert!(usb.slots().slot(2).is_some());
    assert_eq!(usb.check_timeouts(timer::get_milliseconds()), 0);

    let expired = usb.check_timeouts(timer::get_milliseconds() + 10_000);
    assert_eq!(expired, 1);
    assert_eq!(usb.state(1), Some(EnumerationState::EnumerationFailed));
    assert_eq!(
        usb.enumeration(1).and_then(|e| e.failure()).map(|f| (f.state, f.error)),
        Some((EnumerationState::AddressingDevice, UsbError::Timeout))
    );
    assert!(usb.slots().slot(2).is_none());

    // Disable Slot 완료까지 처리하면 남은 명령 없음
    hw.run(&mut usb);
    assert!(hw.commands.contains(&(TrbType::DisableSlot, 2)));
    assert_eq!(usb.pending_command_count(), 0);
}

#[test]
fn no_free_slot_abandons_port() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::EnumerationFailed));
    assert_eq!(
        usb.enumeration(1).and_then(|e| e.failure()).map(|f| f.error),
        Some(UsbError::SlotAllocationFailed)
    );
    assert_eq!(usb.slots().active_count(), 0);
}

#[test]
fn keyboard_reports_reach_observer_and_rearm() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[3]);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    let keys = Rc::new(RefCell::new(KeyLog::default()));
    usb.observers_mut().register_keyboard(&keys);

    assert!(hw.send_report(&mut usb, 3, KEYBOARD_DCI, &[0x02, 0, 0x04, 0, 0, 0, 0, 0]));
    hw.run(&mut usb);
    assert!(hw.send_report(&mut usb, 3, KEYBOARD_DCI, &[0, 0, 0, 0, 0, 0, 0, 0]));
    hw.run(&mut usb);

    let log = keys.borrow();
    assert_eq!(log.0.len(), 2);
    assert!(log.0[0].modifier.shift());
    assert_eq!(log.0[0].key1(), 0x04);
    assert_eq!(log.0[1].pressed_keys().count(), 0);

    // 리포트마다 같은 버퍼로 다시 무장
    assert_eq!(hw.armed_count(3, KEYBOARD_DCI), 1);
    let last = usb.drivers()[0].as_keyboard().and_then(|k| k.last_report());
    assert_eq!(last, Some(log.0[1]));
}

#[test]
fn mouse_short_packet_is_delivered() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[1]);
    hw.set_configuration(1, &MOUSE_CONFIGURATION);
    hw.attach(&mut usb, 1, PortSpeed::Low);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    let driver = &usb.drivers()[0];
    assert_eq!(driver.kind(), ClassDriverKind::Mouse);
    assert_eq!(driver.in_packet_size(), 3);
    let dci = driver.endpoint_dci();

    let motion = Rc::new(RefCell::new(MotionLog::default()));
    usb.observers_mut().register_mouse(&motion);

    assert!(hw.send_report(&mut usb, 1, dci, &[0x01, 0xFF, 0x01]));
    hw.run(&mut usb);

    assert_eq!(motion.borrow().0.len(), 1);
    let report = motion.borrow().0[0];
    assert!(report.buttons.left());
    assert_eq!((report.dx, report.dy), (-1, 1));
    assert_eq!(usb.drivers()[0].as_mouse().map(|m| m.position()), Some((-1, 1)));
}

#[test]
fn unrecognized_interface_releases_slot() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[4]);
    hw.set_configuration(4, &VENDOR_CONFIGURATION);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::EnumerationFailed));
    assert_eq!(
        usb.enumeration(1).and_then(|e| e.failure()).map(|f| f.error),
        Some(UsbError::UnrecognizedInterface)
    );
    assert!(usb.drivers().is_empty());
    assert!(usb.slots().slot(4).is_none());
}

#[test]
fn detach_releases_slot_and_ignores_late_reports() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[3]);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    let keys = Rc::new(RefCell::new(KeyLog::default()));
    usb.observers_mut().register_keyboard(&keys);

    // 분리 직후 이미 전송 중이던 리포트가 도착
    hw.detach(&mut usb, 1);
    assert!(hw.send_report(&mut usb, 3, KEYBOARD_DCI, &[0, 0, 0x05, 0, 0, 0, 0, 0]));
    hw.run(&mut usb);

    assert_eq!(usb.state(1), None);
    assert!(usb.slots().slot(3).is_none());
    assert!(usb.drivers().is_empty());
    assert!(keys.borrow().0.is_empty());
    assert!(hw.commands.contains(&(TrbType::DisableSlot, 3)));
    assert_eq!(usb.pending_command_count(), 0);

    // 같은 슬롯 ID로 다시 연결
    hw.queue_slot_ids(&[3]);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);
    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    assert_eq!(usb.drivers().len(), 1);
}

#[test]
fn existing_devices_are_reset_then_enumerated() {
    let (mut usb, mut hw) = sim::manager(3);
    hw.queue_slot_ids(&[1]);
    usb.host_mut().connect(2, PortSpeed::Low, false);

    usb.attach_existing_ports();
    assert_eq!(usb.state(2), Some(EnumerationState::PortDetected));
    assert_eq!(usb.host().resets, [2]);

    hw.run(&mut usb);
    assert_eq!(usb.state(2), Some(EnumerationState::ClassDriverAttached));
    assert_eq!(usb.state(1), None);
    assert_eq!(usb.state(3), None);

    let slot = usb.slots().slot(1).unwrap();
    assert_eq!(slot.speed(), PortSpeed::Low);
    assert_eq!(slot.input_context().slot.root_hub_port(), 2);
}

#[test]
fn larger_ep0_packet_size_is_evaluated_before_full_descriptor() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[3]);
    hw.ep0_packet_sizes.insert(3, 64);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    assert_eq!(
        hw.commands,
        [
            (TrbType::EnableSlot, 0),
            (TrbType::AddressDevice, 3),
            (TrbType::EvaluateContext, 3),
            (TrbType::ConfigureEndpoint, 3),
        ]
    );
    let lengths: Vec<u16> = hw.requests.iter().take(2).map(|&(_, r)| r.length).collect();
    assert_eq!(lengths, [8, 18]);
    assert_eq!(
        usb.enumeration(1).and_then(|e| e.device_descriptor()).map(|d| d.max_packet_size),
        Some(64)
    );
    let input = usb.slots().slot(3).unwrap().input_context();
    assert_eq!(input.endpoint(EP0_DCI).map(|ep0| ep0.max_packet_size()), Some(64));
}

#[test]
fn high_speed_default_packet_size_skips_evaluate_context() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[1]);
    hw.ep0_packet_sizes.insert(1, 64);
    hw.attach(&mut usb, 1, PortSpeed::High);
    hw.run(&mut usb);

    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    assert!(!hw.commands.iter().any(|&(kind, _)| kind == TrbType::EvaluateContext));
}

#[test]
fn stale_command_timeout_spares_reattached_device() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[2, 3]);
    hw.swallow.push(TrbType::AddressDevice);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);
    assert_eq!(usb.state(1), Some(EnumerationState::AddressingDevice));

    hw.detach(&mut usb, 1);
    hw.run(&mut usb);
    // 응답 없는 Address Device는 분리 후에도 남아 있음
    assert_eq!(usb.pending_command_count(), 1);

    hw.swallow.clear();
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);
    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));

    assert_eq!(usb.check_timeouts(timer::get_milliseconds() + 10_000), 1);
    assert_eq!(usb.pending_command_count(), 0);
    assert_eq!(usb.state(1), Some(EnumerationState::ClassDriverAttached));
    assert_eq!(usb.drivers().len(), 1);
    assert_eq!(usb.drivers()[0].slot().slot_id(), 3);
    assert!(usb.slots().slot(3).is_some());
}

#[test]
fn late_enable_slot_for_detached_port_is_returned() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[5]);
    hw.hold_command_completions = true;
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);
    assert_eq!(hw.held_count(), 1);

    hw.detach(&mut usb, 1);
    hw.run(&mut usb);
    assert_eq!(usb.state(1), None);

    hw.hold_command_completions = false;
    hw.release_held_reversed(&mut usb);
    hw.run(&mut usb);

    assert!(hw.commands.contains(&(TrbType::DisableSlot, 5)));
    assert!(usb.slots().slot(5).is_none());
    assert_eq!(usb.slots().active_count(), 0);
    assert_eq!(usb.pending_command_count(), 0);
}

#[test]
fn slot_memory_outlives_pending_disable_slot() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[3]);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);
    let output = usb.slots().slot(3).unwrap().output_context_phys();

    hw.hold_command_completions = true;
    hw.detach(&mut usb, 1);
    hw.run(&mut usb);

    // Disable Slot 완료 전: 슬롯은 안 보이지만 메모리와 드라이버 버퍼는 유지
    assert!(usb.slots().slot(3).is_none());
    assert!(usb.slots().is_releasing(3));
    assert_eq!(usb.slots().dcbaa_entry(3), Some(output));
    assert!(usb.drivers().is_empty());
    assert_eq!(usb.retired_driver_count(), 1);

    hw.hold_command_completions = false;
    hw.release_held_reversed(&mut usb);
    hw.run(&mut usb);

    assert!(!usb.slots().is_releasing(3));
    assert_eq!(usb.slots().dcbaa_entry(3), Some(0));
    assert_eq!(usb.retired_driver_count(), 0);
    assert_eq!(usb.pending_command_count(), 0);
}

#[test]
fn short_keyboard_report_does_not_reuse_stale_bytes() {
    let (mut usb, mut hw) = sim::manager(1);
    hw.queue_slot_ids(&[3]);
    hw.attach(&mut usb, 1, PortSpeed::Full);
    hw.run(&mut usb);

    let keys = Rc::new(RefCell::new(KeyLog::default()));
    usb.observers_mut().register_keyboard(&keys);

    assert!(hw.send_report(&mut usb, 3, KEYBOARD_DCI, &[0, 0, 0x04, 0x05, 0, 0, 0, 0]));
    hw.run(&mut usb);
    // 2바이트만 온 리포트: 이전 키 바이트가 남아 있으면 안 됨
    assert!(hw.send_report(&mut usb, 3, KEYBOARD_DCI, &[0x02, 0]));
    hw.run(&mut usb);

    let log = keys.borrow();
    assert_eq!(log.0.len(), 2);
    assert_eq!(log.0[0].pressed_keys().count(), 2);
    assert!(log.0[1].modifier.shift());
    assert_eq!(log.0[1].pressed_keys().count(), 0);
}
