//! Process-wide leveled logging for the indexer.
//!
//! Records go to stderr as plain text or JSON lines. Tests can switch on an
//! in-memory capture ring and inspect what a component logged.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            4 => Self::Debug,
            5 => Self::Trace,
            _ => Self::Info,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static STDERR: AtomicBool = AtomicBool::new(true);

static CAPTURE_ON: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAP: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<Record>>> = OnceLock::new();
static RECORD_SEQ: AtomicU64 = AtomicU64::new(0);

/// One emitted log line as kept by the capture ring.
#[derive(Clone, Debug)]
pub struct Record {
    pub seq: u64,
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub line: u32,
    pub msg: String,
}

pub fn init(config: LogConfig) {
    LEVEL.store(config.level as u8, Ordering::Relaxed);
    FORMAT.store(config.format as u8, Ordering::Relaxed);
    TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

pub fn current_level() -> Level {
    Level::from_u8(LEVEL.load(Ordering::Relaxed))
}

pub fn set_stderr_enabled(enabled: bool) {
    STDERR.store(enabled, Ordering::Relaxed);
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ON.store(false, Ordering::Relaxed);
        return;
    }
    CAPTURE_CAP.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    CAPTURE_ON.store(true, Ordering::Relaxed);
}

/// Returns captured records whose message contains `needle`, oldest first.
pub fn captured_matching(needle: &str) -> Vec<Record> {
    let Some(ring) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = ring.lock() else {
        return Vec::new();
    };
    guard
        .iter()
        .filter(|record| record.msg.contains(needle))
        .cloned()
        .collect()
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LEVEL.load(Ordering::Relaxed)
}

pub fn log(level: Level, target: &'static str, line: u32, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
    let capture = CAPTURE_ON.load(Ordering::Relaxed);
    let json_mode = FORMAT.load(Ordering::Relaxed) == Format::Json as u8;
    let msg = if json_mode || capture {
        Some(args.to_string())
    } else {
        None
    };

    if STDERR.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        if json_mode {
            let line = json!({
                "ts_ms": ts_ms,
                "level": level.as_str(),
                "target": target,
                "line": line,
                "msg": msg.as_deref().unwrap_or_default(),
            });
            let _ = writeln!(out, "{line}");
        } else {
            if TIMESTAMPS.load(Ordering::Relaxed) {
                let _ = write!(out, "{} ", Utc(now.as_secs(), now.subsec_millis()));
            }
            let _ = writeln!(out, "{:<5} {target}: {args}", level.as_str());
        }
    }

    if capture {
        push_captured(Record {
            seq: RECORD_SEQ.fetch_add(1, Ordering::Relaxed),
            ts_ms,
            level,
            target,
            line,
            msg: msg.unwrap_or_default(),
        });
    }
}

fn push_captured(record: Record) {
    let Some(ring) = CAPTURE.get() else {
        return;
    };
    let Ok(mut guard) = ring.lock() else {
        return;
    };
    let cap = CAPTURE_CAP.load(Ordering::Relaxed).max(1);
    guard.push_back(record);
    while guard.len() > cap {
        guard.pop_front();
    }
}

/// Rate-limited progress reporting for long batch phases.
///
/// A line is logged each time another tenth of `total` completes, plus once
/// on `finish`.
pub struct Progress {
    label: &'static str,
    total: u64,
    done: u64,
    next_report: u64,
    started: Instant,
}

impl Progress {
    pub fn new(label: &'static str, total: u64) -> Self {
        Self {
            label,
            total,
            done: 0,
            next_report: step(total),
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, count: u64) {
        self.done = self.done.saturating_add(count);
        if self.total == 0 || self.done < self.next_report {
            return;
        }
        let pct = self.done.saturating_mul(100) / self.total;
        log(
            Level::Info,
            self.label,
            line!(),
            format_args!("{}/{} ({pct}%)", self.done, self.total),
        );
        while self.next_report <= self.done {
            self.next_report = self.next_report.saturating_add(step(self.total));
        }
    }

    pub fn finish(self) {
        log(
            Level::Info,
            self.label,
            line!(),
            format_args!(
                "done: {} items in {} ms",
                self.done,
                self.started.elapsed().as_millis()
            ),
        );
    }
}

fn step(total: u64) -> u64 {
    (total / 10).max(1)
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

/// Seconds and milliseconds since the epoch, printed as an RFC 3339 UTC time.
struct Utc(u64, u32);

impl fmt::Display for Utc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = (self.0 / 86_400) as i64;
        let rem = self.0 % 86_400;
        let (year, month, day) = ymd(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60,
            self.1
        )
    }
}

// Hinnant's days-to-civil conversion.
fn ymd(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = i64::from(yoe) + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse(" trace "), Some(Level::Trace));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("yaml"), None);
    }

    #[test]
    fn utc_rendering() {
        assert_eq!(Utc(0, 0).to_string(), "1970-01-01T00:00:00.000Z");
        assert_eq!(Utc(951_782_400, 7).to_string(), "2000-02-29T00:00:00.007Z");
        assert_eq!(Utc(1_231_006_505, 250).to_string(), "2009-01-03T18:15:05.250Z");
    }

    #[test]
    fn progress_reports_into_capture() {
        set_stderr_enabled(false);
        enable_capture(64);
        let mut progress = Progress::new("blockidx::progress-test", 20);
        for _ in 0..20 {
            progress.advance(1);
        }
        progress.finish();
        let lines = captured_matching("/20 (");
        assert_eq!(lines.len(), 10);
        assert!(lines.iter().any(|record| record.msg == "20/20 (100%)"));
        assert_eq!(captured_matching("done: 20 items").len(), 1);
    }
}
