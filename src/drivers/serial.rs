//! COM1 콘솔 출력
//!
//! 커널 로그와 USB 키보드 에코가 나가는 UART 16550 싱크입니다.
//! [`init`] 전에 들어온 출력(이른 패닉 등)은 초기화되지 않은 UART를 건드리지 않도록 버립니다.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;
use uart_16550::SerialPort;

/// COM1 I/O 베이스
const COM1_BASE: u16 = 0x3F8;

/// COM1 시리얼 포트
pub static SERIAL1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1_BASE) });

static READY: AtomicBool = AtomicBool::new(false);

/// COM1 초기화 후 출력 허용
///
/// 부팅 시 가장 먼저 한 번 호출합니다.
pub fn init() {
    SERIAL1.lock().init();
    READY.store(true, Ordering::Release);
}

/// 출력이 UART로 나가는지
pub fn is_ready() -> bool {
    READY.load(Ordering::Acquire)
}

/// 시리얼 포트를 통한 출력 매크로
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::drivers::serial::_print(format_args!($($arg)*));
    };
}

/// 시리얼 포트를 통한 출력 매크로 (줄바꿈 포함)
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(concat!($fmt, "\n"), $($arg)*));
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    if !is_ready() {
        return;
    }
    let _ = SERIAL1.lock().write_fmt(args);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_before_init_is_dropped() {
        assert!(!is_ready());
        // 포트에 접근하지 않고 반환
        crate::serial_println!("dropped {}", 1);
        crate::logging::dump_recent();
    }
}
