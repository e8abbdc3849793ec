pub mod logging;

pub use logging::{
    DriverLogger, JsonlLogSink, LogLevel, LogRecord, LogSink, MemoryLogSink, NullLogSink,
};
