use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn rank(self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warn => 1,
            LogLevel::Info => 2,
            LogLevel::Debug => 3,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        write!(f, "{}", label)
    }
}

type Sink = Box<dyn Fn(LogLevel, &str) + Send + Sync + 'static>;

static MAX_LEVEL: AtomicU8 = AtomicU8::new(2);
static WARNINGS: AtomicUsize = AtomicUsize::new(0);

fn default_sink(level: LogLevel, message: &str) {
    eprintln!("[{}] {}", level, message);
}

fn sink_cell() -> &'static Mutex<Sink> {
    static SINK: OnceLock<Mutex<Sink>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(Box::new(default_sink)))
}

pub fn set_logger(sink: impl Fn(LogLevel, &str) + Send + Sync + 'static) {
    let mut guard = sink_cell().lock().expect("logger lock poisoned");
    *guard = Box::new(sink);
}

pub fn set_max_level(level: LogLevel) {
    MAX_LEVEL.store(level.rank(), Ordering::Relaxed);
}

pub fn log(level: LogLevel, message: impl AsRef<str>) {
    if level == LogLevel::Warn {
        WARNINGS.fetch_add(1, Ordering::Relaxed);
    }
    if level.rank() > MAX_LEVEL.load(Ordering::Relaxed) {
        return;
    }
    let guard = sink_cell().lock().expect("logger lock poisoned");
    (guard)(level, message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    log(LogLevel::Error, message);
}

pub fn warn(message: impl AsRef<str>) {
    log(LogLevel::Warn, message);
}

pub fn info(message: impl AsRef<str>) {
    log(LogLevel::Info, message);
}

pub fn debug(message: impl AsRef<str>) {
    log(LogLevel::Debug, message);
}

pub fn warning_count() -> usize {
    WARNINGS.load(Ordering::Relaxed)
}

pub fn reset_warning_count() {
    WARNINGS.store(0, Ordering::Relaxed);
}
