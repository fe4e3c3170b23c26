//! 커널 구성 값
//!
//! xHCI 드라이버의 링 크기, 슬롯 수, 명령 타임아웃 등 런타임 파라미터와
//! cargo feature에 따른 컴파일 타임 기본값을 정의합니다.

use crate::drivers::usb::error::UsbError;
use crate::logging::LogLevel;
use crate::memory::dma::PAGE_SIZE;

/// 링 하나가 가질 수 있는 최소 TRB 수 (Link TRB 제외)
pub const MIN_RING_SIZE: usize = 4;
/// 링 하나가 가질 수 있는 최대 TRB 수 (Link TRB 제외)
///
/// Link TRB까지 합쳐 한 페이지(256 TRB)를 넘지 않아야 합니다.
pub const MAX_RING_SIZE: usize = 255;

/// xHCI 드라이버 구성
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XhciConfig {
    /// Command Ring의 TRB 슬롯 수 (Link TRB 제외)
    pub command_ring_size: usize,
    /// Event Ring 세그먼트의 TRB 수
    pub event_ring_size: usize,
    /// 엔드포인트별 Transfer Ring의 TRB 슬롯 수 (Link TRB 제외)
    pub transfer_ring_size: usize,
    /// 활성화할 디바이스 슬롯 수 (CONFIG.MaxSlotsEn)
    pub max_slots: u8,
    /// 명령 완료 대기 한도 (밀리초)
    pub command_timeout_ms: u64,
    /// 제어 전송용 데이터 버퍼 크기 (바이트)
    pub control_buffer_size: usize,
}

impl XhciConfig {
    /// 기본 구성
    pub const DEFAULT: XhciConfig = XhciConfig {
        command_ring_size: 32,
        event_ring_size: 64,
        transfer_ring_size: 32,
        max_slots: 8,
        command_timeout_ms: 500,
        control_buffer_size: 256,
    };

    /// 구성 값 검증
    pub fn validate(&self) -> Result<(), UsbError> {
        let ring_ok = |n: usize| (MIN_RING_SIZE..=MAX_RING_SIZE).contains(&n);
        if !ring_ok(self.command_ring_size)
            || !ring_ok(self.event_ring_size)
            || !ring_ok(self.transfer_ring_size)
        {
            return Err(UsbError::InvalidParameter);
        }
        if self.max_slots == 0
            || self.control_buffer_size < 18
            || self.control_buffer_size > PAGE_SIZE
        {
            return Err(UsbError::InvalidParameter);
        }
        Ok(())
    }
}

impl Default for XhciConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 기본 로그 레벨
#[inline]
pub const fn default_log_level() -> LogLevel {
    #[cfg(feature = "verbose_usb")]
    {
        return LogLevel::Trace;
    }
    #[allow(unreachable_code)]
    LogLevel::Debug
}
