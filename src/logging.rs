// In: src/logging.rs

//! Logger setup and progress reporting.
//!
//! Library code only ever talks to the `log` facade. `init_logging` installs an
//! `env_logger` backend once per process; later calls are no-ops, so tests and
//! embedding applications can call it freely.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, Once};

use crate::config::Verbosity;
use crate::error::BloarkError;

static INIT: Once = Once::new();

/// Installs the process-wide logger.
///
/// Writes `[LEVEL] message` lines to stderr, or appends them to `log_file` if given.
pub fn init_logging(verbosity: Verbosity, log_file: Option<&Path>) -> Result<(), BloarkError> {
    // Open before entering `call_once` so a bad path surfaces as an error.
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(verbosity.into());

        // Custom formatter: just print the level and message
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}

//==================================================================================
// Progress
//==================================================================================

/// Receives pool progress events. Implementations must be cheap; they are called
/// from the coordinating thread between dispatches.
pub trait ProgressSink: Send + Sync {
    fn on_unit_started(&self, unit: &str);
    fn on_unit_completed(&self, unit: &str, done: usize, total: usize);
    fn on_unit_failed(&self, unit: &str, reason: &str, done: usize, total: usize);
}

/// Default sink: one log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_unit_started(&self, unit: &str) {
        log::debug!("Started {}", unit);
    }

    fn on_unit_completed(&self, unit: &str, done: usize, total: usize) {
        log::info!("Finished {} ({:.0}% = {} / {})", unit, percent(done, total), done, total);
    }

    fn on_unit_failed(&self, unit: &str, reason: &str, done: usize, total: usize) {
        log::error!(
            "Failed {}: {} ({:.0}% = {} / {})",
            unit,
            reason,
            percent(done, total),
            done,
            total
        );
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// What a `RecordingProgressSink` saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started(String),
    Completed { unit: String, done: usize, total: usize },
    Failed { unit: String, reason: String, done: usize, total: usize },
}

/// Collects events in memory, for callers that want to render progress themselves.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_unit_started(&self, unit: &str) {
        self.push(ProgressEvent::Started(unit.to_string()));
    }

    fn on_unit_completed(&self, unit: &str, done: usize, total: usize) {
        self.push(ProgressEvent::Completed {
            unit: unit.to_string(),
            done,
            total,
        });
    }

    fn on_unit_failed(&self, unit: &str, reason: &str, done: usize, total: usize) {
        self.push(ProgressEvent::Failed {
            unit: unit.to_string(),
            reason: reason.to_string(),
            done,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Verbosity::Debug, None).unwrap();
        init_logging(Verbosity::Quiet, None).unwrap();
        log::info!("logger still usable");
    }

    #[test]
    fn test_init_logging_reports_unopenable_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing-dir").join("run.log");
        assert!(matches!(
            init_logging(Verbosity::Info, Some(&bad)),
            Err(BloarkError::Io(_))
        ));
    }

    #[test]
    fn test_recording_sink_keeps_event_order() {
        let sink = RecordingProgressSink::new();
        sink.on_unit_started("a");
        sink.on_unit_failed("a", "boom", 1, 2);
        sink.on_unit_completed("b", 2, 2);
        assert_eq!(
            sink.events(),
            vec![
                ProgressEvent::Started("a".into()),
                ProgressEvent::Failed {
                    unit: "a".into(),
                    reason: "boom".into(),
                    done: 1,
                    total: 2
                },
                ProgressEvent::Completed {
                    unit: "b".into(),
                    done: 2,
                    total: 2
                },
            ]
        );
    }

    #[test]
    fn test_percent_handles_empty_runs() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
