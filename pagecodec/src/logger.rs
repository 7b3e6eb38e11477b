//! Bridge from the `log` facade to a host-provided logger.
//!
//! The codec logs through `log` macros. A host that embeds it (for example a
//! storage engine with its own diagnostics channel) implements [`Logger`] and
//! calls [`set_logger`] once; records are then forwarded to it.
//!
//! ```rust
//! use std::sync::Arc;
//! use pagecodec::logger::{set_logger, LogLevel, Logger};
//!
//! struct StderrLogger;
//!
//! impl Logger for StderrLogger {
//!     fn log(&self, level: LogLevel, message: String) {
//!         eprintln!("[{level:?}] {message}");
//!     }
//! }
//!
//! set_logger(Arc::new(StderrLogger));
//! ```

use std::sync::{Arc, OnceLock};

/// Receiver for codec log messages.
pub trait Logger: Sync + Send {
    /// Logs a message at the specified level.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Per-page dispatch detail.
    Trace,
    /// Key state transitions.
    Debug,
    /// Rekey lifecycle.
    Info,
    /// Recoverable failures.
    Warn,
    /// Failures that abort an operation.
    Error,
}

/// Forwards `log` records to the registered [`Logger`].
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let is_record_from_codec = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("pagecodec"));

        let is_debug_or_trace_level =
            record.level() == log::Level::Debug || record.level() == log::Level::Trace;

        // Other crates' debug chatter is not ours to forward.
        if is_debug_or_trace_level && !is_record_from_codec {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        }
    }

    fn flush(&self) {}
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Registers `logger` and installs the forwarding `log` backend.
///
/// Only the first call takes effect; later calls are ignored, as is the case
/// where another `log` backend was installed first.
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        log::debug!("logger already set");
        return;
    }
    if let Err(err) = init_logger() {
        eprintln!("failed to install codec logger: {err}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Collect(Mutex<Vec<(LogLevel, String)>>);

    impl Logger for Collect {
        fn log(&self, level: LogLevel, message: String) {
            self.0.lock().expect("lock").push((level, message));
        }
    }

    #[test]
    fn test_records_are_forwarded() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        set_logger(sink.clone());
        log::warn!("codec failure for test");
        let seen = sink.0.lock().expect("lock");
        assert!(seen
            .iter()
            .any(|(level, msg)| *level == LogLevel::Warn && msg == "codec failure for test"));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(log_level(log::Level::Error), LogLevel::Error);
        assert_eq!(log_level(log::Level::Trace), LogLevel::Trace);
    }
}
