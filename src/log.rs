//! Process-wide pluggable log sink (DESIGN NOTES: "Global logger is a
//! process-wide pluggable sink with `set`/`reset`").
//!
//! Components log through [`log_error`]/[`log_warn`]/[`log_info`]/[`log_debug`]
//! rather than calling `tracing` macros directly, so tests can install a
//! capturing sink with [`set_sink`] and restore the default with [`reset_sink`]
//! without needing a process-global `tracing` subscriber per test.

use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell_sink::OnceSink;

/// A single structured field attached to a log record.
pub type Field<'a> = (&'a str, &'a dyn std::fmt::Display);

/// Four-level logging port. Implementations receive a message and a slice
/// of structured key/value fields.
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str, fields: &[Field<'_>]);
    fn warn(&self, message: &str, fields: &[Field<'_>]);
    fn info(&self, message: &str, fields: &[Field<'_>]);
    fn debug(&self, message: &str, fields: &[Field<'_>]);
}

/// Default sink: delegates to `tracing`, matching the teacher's
/// `backend = %name, error = %e, "message"` structured-logging style.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn error(&self, message: &str, fields: &[Field<'_>]) {
        tracing::error!(fields = %format_fields(fields), "{message}");
    }
    fn warn(&self, message: &str, fields: &[Field<'_>]) {
        tracing::warn!(fields = %format_fields(fields), "{message}");
    }
    fn info(&self, message: &str, fields: &[Field<'_>]) {
        tracing::info!(fields = %format_fields(fields), "{message}");
    }
    fn debug(&self, message: &str, fields: &[Field<'_>]) {
        tracing::debug!(fields = %format_fields(fields), "{message}");
    }
}

fn format_fields(fields: &[Field<'_>]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

mod once_cell_sink {
    use super::{Arc, ArcSwap, LogSink, TracingSink};
    use std::sync::OnceLock;

    /// Lazily-initialized, swappable global sink.
    pub struct OnceSink(OnceLock<ArcSwap<dyn LogSink>>);

    impl OnceSink {
        pub const fn new() -> Self {
            Self(OnceLock::new())
        }

        pub fn get(&self) -> &ArcSwap<dyn LogSink> {
            self.0
                .get_or_init(|| ArcSwap::new(Arc::new(TracingSink) as Arc<dyn LogSink>))
        }
    }
}

static SINK: OnceSink = OnceSink::new();

/// Install a sink (tests use this to capture output). Cheap `ArcSwap::store`.
pub fn set_sink(sink: Arc<dyn LogSink>) {
    SINK.get().store(sink);
}

/// Restore the default `tracing`-backed sink. Tests call this for isolation.
pub fn reset_sink() {
    SINK.get().store(Arc::new(TracingSink));
}

pub fn log_error(message: &str, fields: &[Field<'_>]) {
    SINK.get().load().error(message, fields);
}

pub fn log_warn(message: &str, fields: &[Field<'_>]) {
    SINK.get().load().warn(message, fields);
}

pub fn log_info(message: &str, fields: &[Field<'_>]) {
    SINK.get().load().info(message, fields);
}

pub fn log_debug(message: &str, fields: &[Field<'_>]) {
    SINK.get().load().debug(message, fields);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingSink {
        messages: Mutex<Vec<String>>,
    }

    impl LogSink for CapturingSink {
        fn error(&self, message: &str, _fields: &[Field<'_>]) {
            self.messages.lock().unwrap().push(format!("ERROR {message}"));
        }
        fn warn(&self, message: &str, _fields: &[Field<'_>]) {
            self.messages.lock().unwrap().push(format!("WARN {message}"));
        }
        fn info(&self, message: &str, _fields: &[Field<'_>]) {
            self.messages.lock().unwrap().push(format!("INFO {message}"));
        }
        fn debug(&self, message: &str, _fields: &[Field<'_>]) {
            self.messages.lock().unwrap().push(format!("DEBUG {message}"));
        }
    }

    #[test]
    fn set_and_reset_round_trip() {
        let sink = Arc::new(CapturingSink {
            messages: Mutex::new(Vec::new()),
        });
        set_sink(sink.clone());
        log_info("hello", &[]);
        log_warn("careful", &[]);
        assert_eq!(
            *sink.messages.lock().unwrap(),
            vec!["INFO hello".to_string(), "WARN careful".to_string()]
        );
        reset_sink();
    }
}
