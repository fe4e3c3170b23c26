//! USB 호스트 컨트롤러 인터페이스
//!
//! 드라이버 코어가 컨트롤러 레지스터에 요구하는 최소한의 연산입니다.
//! 실제 하드웨어는 [`XhciRegisters`](crate::drivers::usb::xhci::XhciRegisters)가,
//! 테스트에서는 시뮬레이터가 구현합니다.

/// 포트 속도 (PORTSC Port Speed 필드 / Slot Context Speed 필드)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpeed {
    /// Full-speed (12 Mb/s)
    Full = 1,
    /// Low-speed (1.5 Mb/s)
    Low = 2,
    /// High-speed (480 Mb/s)
    High = 3,
    /// SuperSpeed (5 Gb/s)
    Super = 4,
    /// SuperSpeedPlus (10 Gb/s)
    SuperPlus = 5,
}

impl PortSpeed {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(PortSpeed::Full),
            2 => Some(PortSpeed::Low),
            3 => Some(PortSpeed::High),
            4 => Some(PortSpeed::Super),
            5 => Some(PortSpeed::SuperPlus),
            _ => None,
        }
    }

    /// 디바이스 디스크립터를 읽기 전 EP0 최대 패킷 크기
    pub fn default_max_packet_size(self) -> u16 {
        match self {
            PortSpeed::Low | PortSpeed::Full => 8,
            PortSpeed::High => 64,
            PortSpeed::Super | PortSpeed::SuperPlus => 512,
        }
    }
}

/// 루트 허브 포트 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStatus {
    /// Current Connect Status
    pub connected: bool,
    /// Port Enabled (리셋 완료 후 설정됨)
    pub enabled: bool,
    /// Port Reset 진행 중
    pub reset_in_progress: bool,
    /// 연결된 디바이스 속도
    pub speed: Option<PortSpeed>,
}

/// USB 호스트 컨트롤러 인터페이스
pub trait UsbHostController {
    /// 루트 허브 포트 수
    fn port_count(&self) -> u8;

    /// 포트 상태 읽기 (포트 번호는 1부터)
    fn port_status(&self, port: u8) -> PortStatus;

    /// 포트 리셋 시작 (완료는 Port Status Change 이벤트로 통지됨)
    fn reset_port(&mut self, port: u8);

    /// 포트의 변경 비트(CSC, PEC, PRC 등) 지우기
    fn clear_port_change(&mut self, port: u8);

    /// 도어벨 울리기 (슬롯 0은 Command Ring, 그 외는 DCI)
    fn ring_doorbell(&mut self, slot_id: u8, target: u8);

    /// Event Ring Dequeue Pointer 갱신 (EHB 비트 클리어 포함)
    fn set_event_dequeue(&mut self, erdp: u64);

    /// 컨트롤러가 요구하는 스크래치패드 버퍼 수
    fn max_scratchpad_buffers(&self) -> u16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ep0_packet_sizes() {
        assert_eq!(PortSpeed::Low.default_max_packet_size(), 8);
        assert_eq!(PortSpeed::Full.default_max_packet_size(), 8);
        assert_eq!(PortSpeed::High.default_max_packet_size(), 64);
        assert_eq!(PortSpeed::Super.default_max_packet_size(), 512);
    }

    #[test]
    fn speed_from_portsc_field() {
        assert_eq!(PortSpeed::from_raw(2), Some(PortSpeed::Low));
        assert_eq!(PortSpeed::from_raw(0), None);
        assert_eq!(PortSpeed::from_raw(15), None);
    }
}
