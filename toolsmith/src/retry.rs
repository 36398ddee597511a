//! Retry coordinator: bounded re-invocation of fallible operations.
//!
//! Each [`Retrier::with_retry`] call keeps its own fingerprint counters, so a
//! fault class can exhaust its budget independently of other classes seen in
//! the same call, and nothing leaks between calls or runs.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::classifier::classify;
use crate::events::EventSink;

/// Default per-fingerprint attempt budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Blocking pause between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Applies the classifier to every fault of a wrapped operation.
pub struct Retrier<'a> {
    max_retries: u32,
    sleeper: &'a dyn Sleeper,
    sink: &'a dyn EventSink,
}

impl<'a> Retrier<'a> {
    pub fn new(max_retries: u32, sleeper: &'a dyn Sleeper, sink: &'a dyn EventSink) -> Self {
        Self {
            max_retries,
            sleeper,
            sink,
        }
    }

    /// Invoke `operation` until it succeeds or its fault may not be retried.
    ///
    /// The last fault is returned when its fingerprint reaches `max_retries`
    /// occurrences, or immediately when the classifier forbids a retry.
    pub fn with_retry<T, F>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut counts: HashMap<String, u32> = HashMap::new();
        loop {
            let err = match operation() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let fix = classify(&err);
            self.sink
                .emit(&format!("Analyzing error during {label}: {err:#}"));
            self.sink.emit(&format!("Fix strategy: {}", fix.suggestion));

            let count = counts.entry(fix.error_fingerprint.clone()).or_insert(0);
            *count += 1;
            debug!(
                label,
                fingerprint = %fix.error_fingerprint,
                count = *count,
                should_retry = fix.should_retry,
                "classified fault"
            );

            if *count >= self.max_retries {
                warn!(label, fingerprint = %fix.error_fingerprint, "retry budget exhausted");
                self.sink.emit(&format!(
                    "Error '{}' occurred {} times, giving up on {label}.",
                    fix.error_fingerprint, self.max_retries
                ));
                return Err(err);
            }
            if !fix.should_retry {
                warn!(label, fingerprint = %fix.error_fingerprint, "fault is not retryable");
                return Err(err);
            }

            if !fix.retry_delay.is_zero() {
                self.sink.emit(&format!(
                    "Waiting {} seconds...",
                    fix.retry_delay.as_secs()
                ));
                self.sleeper.sleep(fix.retry_delay);
            }
            self.sink.emit(&format!(
                "Retrying {label} (attempt {}/{})...",
                *count + 1,
                self.max_retries
            ));
        }
    }
}
