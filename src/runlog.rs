// Run log - injectable progress sink
//
// The pipeline reports stage entry/exit and row counts through `RunLog`.
// Sinks live for one run and are passed in by the caller; nothing here is
// process-global.

use chrono::Local;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub type Field<'a> = (&'a str, &'a dyn fmt::Display);

pub trait RunLog {
    fn record(&self, event: &str, fields: &[Field<'_>]);
}

/// `key=value` pairs separated by spaces
pub fn render_fields(fields: &[Field<'_>]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// SINKS
// ============================================================================

/// Forwards every record to `tracing` at INFO.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunLog;

impl RunLog for TracingRunLog {
    fn record(&self, event: &str, fields: &[Field<'_>]) {
        if fields.is_empty() {
            tracing::info!(target: "dw_etl::run", "{event}");
        } else {
            tracing::info!(target: "dw_etl::run", "{event} {}", render_fields(fields));
        }
    }
}

/// Human-readable append-only file, one line per record:
/// `2024-02-01 10:30:00.123 - load.start mode=incremental`
pub struct FileRunLog {
    file: Mutex<File>,
}

impl FileRunLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileRunLog {
            file: Mutex::new(file),
        })
    }
}

impl RunLog for FileRunLog {
    fn record(&self, event: &str, fields: &[Field<'_>]) {
        let mut line = format!("{} - {event}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
        if !fields.is_empty() {
            line.push(' ');
            line.push_str(&render_fields(fields));
        }

        let Ok(mut file) = self.file.lock() else {
            return;
        };
        // A broken log file must not abort the load
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("run log write failed: {e}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: String,
    pub fields: Vec<(String, String)>,
}

impl RecordedEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps records in memory; used by tests and for summaries.
#[derive(Debug, Default)]
pub struct MemoryRunLog {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn find(&self, event: &str) -> Option<RecordedEvent> {
        self.events().into_iter().find(|e| e.event == event)
    }
}

impl RunLog for MemoryRunLog {
    fn record(&self, event: &str, fields: &[Field<'_>]) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                event: event.to_string(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
}

/// Fan out to two sinks
impl<A: RunLog, B: RunLog> RunLog for (A, B) {
    fn record(&self, event: &str, fields: &[Field<'_>]) {
        self.0.record(event, fields);
        self.1.record(event, fields);
    }
}

impl<T: RunLog + ?Sized> RunLog for Box<T> {
    fn record(&self, event: &str, fields: &[Field<'_>]) {
        (**self).record(event, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        let rows = 3;
        let rendered = render_fields(&[("stream", &"sales"), ("rows", &rows)]);
        assert_eq!(rendered, "stream=sales rows=3");
        assert_eq!(render_fields(&[]), "");
    }

    #[test]
    fn test_memory_log_records_fields() {
        let log = MemoryRunLog::new();

        log.record("facts.loaded", &[("stream", &"sales"), ("inserted", &7)]);
        log.record("load.finish", &[]);

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].field("inserted"), Some("7"));
        assert!(log.find("load.finish").unwrap().fields.is_empty());
        assert!(log.find("missing").is_none());
    }

    #[test]
    fn test_file_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("etl.log");

        {
            let log = FileRunLog::open(&path).unwrap();
            log.record("load.start", &[("mode", &"full")]);
        }
        {
            let log = FileRunLog::open(&path).unwrap();
            log.record("load.finish", &[]);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - load.start mode=full"));
        assert!(lines[1].ends_with(" - load.finish"));
    }

    #[test]
    fn test_pair_fans_out() {
        let pair = (MemoryRunLog::new(), MemoryRunLog::new());

        pair.record("stage", &[("n", &1)]);

        assert_eq!(pair.0.events().len(), 1);
        assert_eq!(pair.1.events(), pair.0.events());
    }
}
