use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp: i64,
    pub level: LogLevel,
    pub driver: String,
    pub event: String,
    pub message: String,
}

/// Destination for driver log records. Handed to each `Driver` at
/// construction; nothing in this crate logs through a global.
pub trait LogSink: Send + Sync {
    fn record(&self, record: LogRecord);
}

#[derive(Debug, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn record(&self, _record: LogRecord) {}
}

/// Appends one JSON object per line. Write failures are dropped so that
/// logging never changes the outcome of a lifecycle call.
#[derive(Debug, Clone)]
pub struct JsonlLogSink {
    path: PathBuf,
}

impl JsonlLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonlLogSink {
    fn record(&self, record: LogRecord) {
        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };

        if let Some(parent) = self.path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, record: LogRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Log handle scoped to one driver instance.
#[derive(Clone)]
pub struct DriverLogger {
    driver: String,
    sink: Arc<dyn LogSink>,
}

impl DriverLogger {
    pub fn new(driver: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            driver: driver.into(),
            sink,
        }
    }

    pub fn disabled() -> Self {
        Self::new("", Arc::new(NullLogSink))
    }

    pub fn log(&self, level: LogLevel, event: &str, message: &str) {
        self.sink.record(LogRecord {
            timestamp: chrono::Utc::now().timestamp(),
            level,
            driver: self.driver.clone(),
            event: event.to_string(),
            message: message.to_string(),
        });
    }

    pub fn debug(&self, event: &str, message: &str) {
        self.log(LogLevel::Debug, event, message);
    }

    pub fn info(&self, event: &str, message: &str) {
        self.log(LogLevel::Info, event, message);
    }

    pub fn warn(&self, event: &str, message: &str) {
        self.log(LogLevel::Warn, event, message);
    }

    pub fn error(&self, event: &str, message: &str) {
        self.log(LogLevel::Error, event, message);
    }
}

impl std::fmt::Debug for DriverLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverLogger")
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}
