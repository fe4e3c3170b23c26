//! 로깅 시스템
//!
//! 이 모듈은 커널 전역 로깅 시스템을 제공합니다.
//! 모든 로그는 링 버퍼에 보관되며, 베어메탈 환경에서는 시리얼 포트로도 출력됩니다.

use core::fmt;
use spin::Mutex;

/// 로그 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// 에러 레벨 (항상 출력)
    Error = 0,
    /// 경고 레벨
    Warn = 1,
    /// 정보 레벨
    Info = 2,
    /// 디버그 레벨
    Debug = 3,
    /// 트레이스 레벨 (가장 상세)
    Trace = 4,
}

#[allow(dead_code)]
impl LogLevel {
    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

const RING_CAPACITY: usize = 256;
const MAX_LOG_LINE_LEN: usize = 128;

/// 현재 로그 레벨 (런타임에 변경 가능)
static LOG_LEVEL: Mutex<LogLevel> = Mutex::new(crate::config::default_log_level());

/// 구조화된 로그 엔트리
#[derive(Clone, Copy)]
pub struct LogEntry {
    timestamp_ms: u64,
    level: LogLevel,
    message: [u8; MAX_LOG_LINE_LEN],
    message_len: usize,
}

impl LogEntry {
    const fn new() -> Self {
        Self {
            timestamp_ms: 0,
            level: LogLevel::Info,
            message: [0; MAX_LOG_LINE_LEN],
            message_len: 0,
        }
    }

    fn set(&mut self, timestamp_ms: u64, level: LogLevel, msg: &[u8]) {
        self.timestamp_ms = timestamp_ms;
        self.level = level;
        self.message_len = msg.len().min(MAX_LOG_LINE_LEN);
        self.message[..self.message_len].copy_from_slice(&msg[..self.message_len]);
    }

    /// 기록 시각 (밀리초)
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// 로그 레벨
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// 메시지 본문
    ///
    /// 잘린 메시지가 UTF-8 경계를 깨뜨린 경우 유효한 앞부분만 반환합니다.
    pub fn message(&self) -> &str {
        let bytes = &self.message[..self.message_len];
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

struct LogRing {
    entries: [LogEntry; RING_CAPACITY],
    head: usize,
    count: usize,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::new(); RING_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, timestamp_ms: u64, level: LogLevel, msg: &[u8]) {
        self.entries[self.head].set(timestamp_ms, level, msg);
        self.head = (self.head + 1) % RING_CAPACITY;
        if self.count < RING_CAPACITY {
            self.count += 1;
        }
    }

    fn for_each<F: FnMut(&LogEntry)>(&self, mut f: F) {
        let start = if self.count == RING_CAPACITY { self.head } else { 0 };
        for i in 0..self.count {
            let idx = (start + i) % RING_CAPACITY;
            f(&self.entries[idx]);
        }
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// 현재 로그 레벨
pub fn level() -> LogLevel {
    *LOG_LEVEL.lock()
}

/// 로그 레벨 변경
pub fn set_level(level: LogLevel) {
    *LOG_LEVEL.lock() = level;
}

/// 로그 출력 함수
pub fn log(level: LogLevel, args: fmt::Arguments) {
    if level > self::level() {
        return;
    }

    let timestamp_ms = crate::drivers::timer::get_milliseconds();

    // 메시지를 고정 길이 버퍼로 포맷팅 (넘치는 부분은 잘림)
    let mut buf = [0u8; MAX_LOG_LINE_LEN];
    let mut line = LineBuffer { buf: &mut buf, pos: 0 };
    let _ = fmt::Write::write_fmt(&mut line, args);
    let len = line.pos;

    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    {
        crate::serial_print!("{} ", level.prefix());
        crate::serial_print!("{}\n", args);
    }

    LOG_RING.lock().push(timestamp_ms, level, &buf[..len]);
}

/// 임시 로그 버퍼 (포맷팅용)
struct LineBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> fmt::Write for LineBuffer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len().saturating_sub(self.pos);
        let to_write = bytes.len().min(remaining);
        self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

/// 보관된 로그를 오래된 순서대로 순회
pub fn for_each_recent<F: FnMut(&LogEntry)>(f: F) {
    LOG_RING.lock().for_each(f);
}

/// 보관된 로그 중 `needle`을 포함하는 메시지가 있는지 확인
pub fn contains(needle: &str) -> bool {
    let mut found = false;
    for_each_recent(|entry| {
        if !found && entry.message().contains(needle) {
            found = true;
        }
    });
    found
}

/// 최근 로그 덤프
#[cfg(any(test, all(target_os = "none", target_arch = "x86_64")))]
pub fn dump_recent() {
    crate::serial_println!("\n--- Recent Logs ---");
    for_each_recent(|entry| {
        crate::serial_println!(
            "[{}ms] [{}] {}",
            entry.timestamp_ms,
            entry.level.label(),
            entry.message()
        );
    });
    crate::serial_println!("--- End Logs ---\n");
}

/// 특정 레벨의 로그만 필터링하여 출력
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub fn dump_by_level(level: LogLevel) {
    crate::serial_println!("\n--- Recent {} Logs ---", level.label());
    for_each_recent(|entry| {
        if entry.level == level {
            crate::serial_println!("[{}ms] {}", entry.timestamp_ms, entry.message());
        }
    });
    crate::serial_println!("--- End {} Logs ---\n", level.label());
}

/// 에러 레벨 로그 매크로
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Error, format_args!($($arg)*));
    };
}

/// 경고 레벨 로그 매크로
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Warn, format_args!($($arg)*));
    };
}

/// 정보 레벨 로그 매크로
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Info, format_args!($($arg)*));
    };
}

/// 디버그 레벨 로그 매크로
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Debug, format_args!($($arg)*));
    };
}

/// 트레이스 레벨 로그 매크로
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Trace, format_args!($($arg)*));
    };
}
