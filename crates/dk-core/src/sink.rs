use dk_types::{LogLevel, LogRecord};
use tracing::{debug, error, info, warn};

/// Destination of structured records produced while a component runs.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

/// Forwards records to `tracing`, with the record context as a JSON field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: LogRecord) {
        let context = serde_json::to_string(&record.context).unwrap_or_default();
        let component = record.component.as_str();
        match record.level {
            LogLevel::Debug => debug!(component, context = %context, "{}", record.message),
            LogLevel::Info => info!(component, context = %context, "{}", record.message),
            LogLevel::Warning => warn!(component, context = %context, "{}", record.message),
            LogLevel::Error => error!(component, context = %context, "{}", record.message),
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every record for assertions.
    #[derive(Default)]
    pub(crate) struct MemorySink {
        records: Mutex<Vec<LogRecord>>,
    }

    impl MemorySink {
        pub(crate) fn records(&self) -> Vec<LogRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl LogSink for MemorySink {
        fn log(&self, record: LogRecord) {
            self.records.lock().unwrap().push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySink;
    use super::*;

    #[test]
    fn tracing_sink_accepts_all_levels() {
        let sink = TracingSink;
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warning, LogLevel::Error] {
            sink.log(LogRecord::new(level, "keboola.ex-http", "line").with_context("row", 1));
        }
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::default();
        sink.log(LogRecord::new(LogLevel::Info, "c", "first"));
        sink.log(LogRecord::new(LogLevel::Error, "c", "second"));
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, "second");
        assert_eq!(records[1].level, LogLevel::Error);
    }
}
