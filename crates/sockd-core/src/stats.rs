//! The stats sink collaborator contract:
//! `Stats.Trigger(durationNanos float64)`, a non-blocking counter sink.
//!
//! The Prometheus exporter that would consume this is out of scope for
//! this crate; `NoopStats` lets `sockd` run without one wired in.

use std::sync::Arc;

pub trait Stats: Send + Sync {
    /// Records that one request took `duration_nanos` nanoseconds.
    /// Implementations must not block the caller.
    fn trigger(&self, duration_nanos: f64);
}

pub struct NoopStats;

impl Stats for NoopStats {
    #[inline]
    fn trigger(&self, _duration_nanos: f64) {}
}

pub type SharedStats = Arc<dyn Stats>;
