//! Zakuro OS Kernel Entry Point
//!
//! 부트로더가 커널을 로드한 후 `kernel_main`이 호출됩니다.
//! 초기화 순서:
//! 1. 시리얼 포트
//! 2. 부트 정보 저장, 메모리(물리 메모리 오프셋, 힙) 초기화
//! 3. PCI에서 xHCI 컨트롤러 탐색, 리셋, 시작
//! 4. 입력 옵저버 등록 후 Event Ring 폴링 루프

#![no_std]
#![no_main]

extern crate alloc;

use alloc::rc::Rc;
use core::cell::RefCell;
use core::panic::PanicInfo;

use bootloader_api::config::Mapping;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

use zakuro_os::config::XhciConfig;
use zakuro_os::drivers::usb::hid::keyboard::usage_to_ascii;
use zakuro_os::drivers::usb::hid::{KeyboardObserver, MouseObserver, MouseReport, RawKeyEvent};
use zakuro_os::drivers::usb::xhci::XhciRegisters;
use zakuro_os::drivers::usb::{UsbError, UsbManager};
use zakuro_os::drivers::{pci, serial, timer};
use zakuro_os::{log_error, log_info, log_trace, serial_print, serial_println};

/// DMA 주소 변환을 위해 물리 메모리 전체를 매핑
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// 패닉 핸들러
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("KERNEL PANIC: {}", info);
    halt()
}

fn halt() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    serial::init();
    serial_println!("Zakuro OS booting...");
    // SAFETY: 부팅 중 한 번, PIT를 쓰는 다른 코드가 없을 때 호출됩니다.
    unsafe { timer::init() };

    let handoff = zakuro_os::boot::init_boot_info(boot_info);
    // SAFETY: 부트로더가 넘긴 오프셋이며 한 번만 호출됩니다.
    unsafe { zakuro_os::memory::init(handoff.physical_memory_offset) };
    log_info!(
        "Boot: {} memory regions, framebuffer {:?}",
        handoff.memory_region_count,
        handoff.framebuffer.map(|fb| (fb.width, fb.height, fb.pixel_format))
    );

    let offset = handoff.physical_memory_offset.unwrap_or(0);
    match start_usb(offset) {
        Ok(usb) => run(usb),
        Err(error) => {
            log_error!("USB: controller bring-up failed: {}", error);
            halt()
        }
    }
}

/// xHCI 컨트롤러 탐색과 시작
fn start_usb(physical_memory_offset: u64) -> Result<UsbManager<XhciRegisters>, UsbError> {
    // SAFETY: PCI 구성 공간 포트 접근은 초기화 중 이 코드만 합니다.
    let device = unsafe { pci::find_xhci_controller() }.ok_or(UsbError::DeviceNotFound)?;
    let bar = device.mmio_base().ok_or(UsbError::HostControllerInitFailed)?;
    unsafe { device.enable_bus_master() };

    // SAFETY: BAR0는 부트로더의 물리 메모리 매핑 안에 있습니다.
    let mut registers = unsafe { XhciRegisters::new(physical_memory_offset + bar) };
    unsafe { registers.reset()? };

    let mut usb = UsbManager::new(registers, XhciConfig::DEFAULT)?;
    // SAFETY: 바로 위에서 리셋했습니다.
    unsafe { usb.start()? };
    Ok(usb)
}

/// 새로 눌린 키를 시리얼 콘솔에 출력
#[derive(Default)]
struct ConsoleKeyboard {
    previous: RawKeyEvent,
}

impl KeyboardObserver for ConsoleKeyboard {
    fn on_key_event(&mut self, event: &RawKeyEvent) {
        if !event.is_rollover() {
            for key in event.pressed_keys() {
                if self.previous.keys.contains(&key) {
                    continue;
                }
                if let Some(ch) = usage_to_ascii(key, event.modifier.shift()) {
                    serial_print!("{}", ch);
                }
            }
        }
        self.previous = *event;
    }
}

#[derive(Default)]
struct MouseTrace;

impl MouseObserver for MouseTrace {
    fn on_mouse_event(&mut self, report: &MouseReport) {
        log_trace!(
            "mouse: buttons={:#04x} dx={} dy={}",
            report.buttons.bits(),
            report.dx,
            report.dy
        );
    }
}

fn run(mut usb: UsbManager<XhciRegisters>) -> ! {
    let keyboard = Rc::new(RefCell::new(ConsoleKeyboard::default()));
    let mouse = Rc::new(RefCell::new(MouseTrace));
    usb.observers_mut().register_keyboard(&keyboard);
    usb.observers_mut().register_mouse(&mouse);

    usb.attach_existing_ports();
    log_info!("USB: polling event ring");

    loop {
        usb.poll();
        timer::poll();
        usb.check_timeouts(timer::get_milliseconds());
        core::hint::spin_loop();
    }
}
