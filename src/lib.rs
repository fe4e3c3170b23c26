//! Zakuro OS Kernel Library
//!
//! 이 모듈은 Zakuro OS 커널의 라이브러리 루트입니다.
//! USB 호스트 컨트롤러(xHCI) 드라이버 코어와 HID 클래스 드라이버,
//! 그리고 이를 받치는 로깅/메모리/부트 인터페이스 모듈을 export합니다.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod boot;
pub mod config;
pub mod drivers;
pub mod memory;

pub mod logging;

// 매크로는 자동으로 crate 루트에 사용 가능하므로 재export 불필요
// 사용: zakuro_os::serial_println!() 또는 zakuro_os::log_info!()
