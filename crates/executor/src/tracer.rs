//! Request tracing.
//!
//! Every dispatched operation opens a span. The span travels with the
//! operation's completion context and is ended on the I/O thread before the
//! caller is released.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use tether_core::Error;

/// Span covering one operation.
pub trait RequestSpan: Send {
    /// Attach an attribute.
    fn set_attribute(&mut self, key: &'static str, value: String);

    /// End the span with the operation's outcome.
    fn end(self: Box<Self>, error: Option<&Error>);
}

/// Factory for request spans.
pub trait RequestTracer: Send + Sync {
    /// Open a span for `operation`.
    fn start(&self, operation: &'static str) -> Box<dyn RequestSpan>;
}

/// Tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl RequestSpan for NoopSpan {
    fn set_attribute(&mut self, _key: &'static str, _value: String) {}

    fn end(self: Box<Self>, _error: Option<&Error>) {}
}

impl RequestTracer for NoopTracer {
    fn start(&self, _operation: &'static str) -> Box<dyn RequestSpan> {
        Box::new(NoopSpan)
    }
}

/// Tracer that reports operations slower than a threshold as `tracing`
/// events.
#[derive(Debug, Clone, Copy)]
pub struct LoggingTracer {
    threshold: Duration,
}

impl LoggingTracer {
    /// Report operations taking at least `threshold`.
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Configured threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

struct LoggingSpan {
    operation: &'static str,
    started: Instant,
    threshold: Duration,
    attributes: Vec<(&'static str, String)>,
}

impl RequestSpan for LoggingSpan {
    fn set_attribute(&mut self, key: &'static str, value: String) {
        self.attributes.push((key, value));
    }

    fn end(self: Box<Self>, error: Option<&Error>) {
        let elapsed = self.started.elapsed();
        if elapsed < self.threshold {
            debug!(operation = self.operation, elapsed_us = elapsed.as_micros() as u64, "operation complete");
            return;
        }
        info!(
            operation = self.operation,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = self.threshold.as_millis() as u64,
            attributes = ?self.attributes,
            failed = error.is_some(),
            "slow operation"
        );
    }
}

impl RequestTracer for LoggingTracer {
    fn start(&self, operation: &'static str) -> Box<dyn RequestSpan> {
        Box::new(LoggingSpan {
            operation,
            started: Instant::now(),
            threshold: self.threshold,
            attributes: Vec::new(),
        })
    }
}
