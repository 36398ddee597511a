//! Human-readable event sink for lifecycle transitions.
//!
//! The sink is the product output of a run (what a presentation layer shows to
//! its user). It is one-way: the engine only appends lines and never reads
//! them back. Development diagnostics go through `tracing` instead.

/// Append-only receiver of progress lines.
pub trait EventSink: Send + Sync {
    fn emit(&self, line: &str);
}

impl<F> EventSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, line: &str) {
        self(line);
    }
}

/// Sink that drops every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _line: &str) {}
}

/// Sink that tags every line before forwarding it, used for concurrent runs.
pub struct PrefixedSink<'a> {
    prefix: String,
    inner: &'a dyn EventSink,
}

impl<'a> PrefixedSink<'a> {
    pub fn new(prefix: impl Into<String>, inner: &'a dyn EventSink) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }
}

impl EventSink for PrefixedSink<'_> {
    fn emit(&self, line: &str) {
        self.inner.emit(&format!("[{}] {line}", self.prefix));
    }
}
