//! Telemetry observer boundary
//!
//! The core reports typed lifecycle events through [`TelemetryObserver`];
//! whether the observer is a no-op, a tracing exporter, or a metrics
//! aggregator is outside the core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Observer for spans and metrics emitted by the core.
pub trait TelemetryObserver: Send + Sync {
    /// Start a span; returns an id passed back to [`span_end`].
    ///
    /// [`span_end`]: TelemetryObserver::span_end
    fn span_start(&self, name: &'static str) -> u64;

    /// End a span started by [`span_start`].
    ///
    /// [`span_start`]: TelemetryObserver::span_start
    fn span_end(&self, id: u64, name: &'static str, ok: bool);

    /// Add to a named counter.
    fn counter(&self, name: &'static str, value: u64);

    /// Record a duration sample.
    fn duration(&self, name: &'static str, elapsed: Duration);
}

/// Observer that discards everything.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryObserver for NoopTelemetry {
    fn span_start(&self, _name: &'static str) -> u64 {
        0
    }

    fn span_end(&self, _id: u64, _name: &'static str, _ok: bool) {}

    fn counter(&self, _name: &'static str, _value: u64) {}

    fn duration(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Observer that forwards to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingTelemetry {
    next_span: AtomicU64,
}

impl TelemetryObserver for TracingTelemetry {
    fn span_start(&self, name: &'static str) -> u64 {
        let id = self.next_span.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(span = name, span_id = id, "span start");
        id
    }

    fn span_end(&self, id: u64, name: &'static str, ok: bool) {
        tracing::debug!(span = name, span_id = id, ok, "span end");
    }

    fn counter(&self, name: &'static str, value: u64) {
        tracing::debug!(counter = name, value, "counter");
    }

    fn duration(&self, name: &'static str, elapsed: Duration) {
        tracing::debug!(metric = name, elapsed_ms = elapsed.as_millis() as u64, "duration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_is_inert() {
        let telemetry = NoopTelemetry;
        let id = telemetry.span_start("x");
        telemetry.span_end(id, "x", true);
        telemetry.counter("c", 1);
        telemetry.duration("d", Duration::from_millis(5));
    }

    #[test]
    fn test_tracing_span_ids_increase() {
        let telemetry = TracingTelemetry::default();
        let a = telemetry.span_start("a");
        let b = telemetry.span_start("b");
        assert_ne!(a, b);
    }
}
