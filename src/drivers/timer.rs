//! PIT 기반 밀리초 시계
//!
//! 인터럽트를 쓰지 않는 커널 코어이므로 PIT 채널 0을 분주기 65536의 rate
//! generator로 돌려 두고, 메인 루프가 [`poll`]로 카운터를 래치해 읽습니다.
//! 직전 값과의 차이를 1.193182 MHz 기준으로 환산해 밀리초 카운터를 올립니다.
//! 카운터는 약 55ms마다 한 바퀴 돌므로 그보다 자주 폴링해야 합니다.
//!
//! 로그 타임스탬프와 xHCI 명령 완료 기한 계산에 사용됩니다.

use spin::Mutex;
use x86_64::instructions::port::Port;

/// PIT I/O 포트 주소
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// PIT 기본 클럭 주파수 (Hz)
const PIT_BASE_FREQUENCY: u64 = 1_193_182;

/// Channel 0, lobyte/hibyte, Mode 2 (rate generator), Binary
const MODE2_LOHI: u8 = 0x34;
/// Channel 0 카운터 래치
const LATCH_CHANNEL0: u8 = 0x00;

/// 밀리초 카운터
static TICK_COUNT: Mutex<u64> = Mutex::new(0);

static CLOCK: Mutex<PitClock> = Mutex::new(PitClock::new());

/// 하강 카운터 값을 밀리초로 누적
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PitClock {
    /// 마지막으로 읽은 카운터 값 (0 = 65536)
    last_count: u16,
    /// 아직 1ms가 안 된 PIT 틱 × 1000
    remainder: u64,
}

impl PitClock {
    const fn new() -> Self {
        Self {
            last_count: 0,
            remainder: 0,
        }
    }

    /// 새 카운터 값까지 경과한 밀리초
    fn elapsed_ms(&mut self, count: u16) -> u64 {
        let pit_ticks = self.last_count.wrapping_sub(count) as u64;
        self.last_count = count;
        self.remainder += pit_ticks * 1000;
        let ms = self.remainder / PIT_BASE_FREQUENCY;
        self.remainder %= PIT_BASE_FREQUENCY;
        ms
    }
}

/// PIT 초기화
///
/// 분주기 0(= 65536)을 써서 카운터가 최대 주기로 돌게 합니다.
///
/// # Safety
/// PIT 포트에 접근하므로 한 번만, 다른 PIT 사용자가 없을 때 호출해야 합니다.
pub unsafe fn init() {
    let mut command_port: Port<u8> = Port::new(PIT_COMMAND);
    let mut data_port: Port<u8> = Port::new(PIT_CHANNEL0_DATA);
    command_port.write(MODE2_LOHI);
    data_port.write(0);
    data_port.write(0);

    *CLOCK.lock() = PitClock::new();
    crate::log_info!("PIT initialized: rate generator, polled at {} Hz input", PIT_BASE_FREQUENCY);
}

/// 카운터 래치 후 현재 값 읽기
///
/// # Safety
/// [`init`] 이후에만 호출해야 합니다.
unsafe fn read_count() -> u16 {
    let mut command_port: Port<u8> = Port::new(PIT_COMMAND);
    let mut data_port: Port<u8> = Port::new(PIT_CHANNEL0_DATA);
    command_port.write(LATCH_CHANNEL0);
    let low = data_port.read() as u16;
    let high = data_port.read() as u16;
    (high << 8) | low
}

/// PIT 카운터를 읽어 밀리초 카운터 갱신
///
/// 메인 루프에서 55ms보다 자주 호출해야 합니다.
pub fn poll() {
    let mut clock = CLOCK.lock();
    // SAFETY: 메인 루프는 init 이후에만 돌며 PIT는 이 모듈만 사용합니다.
    let count = unsafe { read_count() };
    let ms = clock.elapsed_ms(count);
    if ms > 0 {
        advance(ms);
    }
}

/// 경과 시간 반영
pub fn advance(ms: u64) {
    let mut ticks = TICK_COUNT.lock();
    *ticks = ticks.saturating_add(ms);
}

/// 밀리초 가져오기
pub fn get_milliseconds() -> u64 {
    *TICK_COUNT.lock()
}

/// 초 가져오기
pub fn get_seconds() -> u64 {
    get_milliseconds() / 1000
}
