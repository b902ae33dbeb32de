//! Metrics instrumentation for gce-dns.
//!
//! All metrics are prefixed with `gce_dns.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NoData => "nodata",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::Fallthrough => "fallthrough",
        QueryResult::NotReady => "not_ready",
    };

    counter!("gce_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("gce_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query returned records successfully.
    Success,
    /// Name exists, no records of the queried type.
    NoData,
    /// Domain not found.
    NxDomain,
    /// Miss delegated to the next handler.
    Fallthrough,
    /// No snapshot installed yet.
    NotReady,
}

/// Record the outcome of one refresh cycle.
pub fn record_refresh(outcome: RefreshOutcome, duration: Duration) {
    let outcome_str = match outcome {
        RefreshOutcome::Installed => "installed",
        RefreshOutcome::FetchFailed => "fetch_failed",
        RefreshOutcome::BuildFailed => "build_failed",
    };

    counter!("gce_dns.refresh.count", "outcome" => outcome_str).increment(1);
    histogram!("gce_dns.refresh.duration.seconds", "outcome" => outcome_str)
        .record(duration.as_secs_f64());
}

/// Refresh cycle outcomes.
#[derive(Debug, Clone, Copy)]
pub enum RefreshOutcome {
    /// A new snapshot was installed.
    Installed,
    /// The inventory source failed.
    FetchFailed,
    /// Templating or address parsing failed for some instance.
    BuildFailed,
}

/// Record the size and generation of the live snapshot.
pub fn record_snapshot(names: usize, records: usize, generation: u64) {
    gauge!("gce_dns.snapshot.names.count").set(names as f64);
    gauge!("gce_dns.snapshot.records.count").set(records as f64);
    gauge!("gce_dns.snapshot.generation").set(generation as f64);
}

/// Record readiness state.
pub fn record_ready_state(ready: bool) {
    gauge!("gce_dns.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record records returned for a successful A lookup.
pub fn record_answers_returned(count: usize) {
    histogram!("gce_dns.query.a.records_returned").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
