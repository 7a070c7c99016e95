// Metrics for endpoint reconciliation
// Counters and gauges are recorded through the `metrics` facade; installing an
// exporter is left to the host process.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub const RECONCILE_TICKS_TOTAL: &str = "porta_reconcile_ticks_total";
pub const RECONCILE_TICK_DURATION: &str = "porta_reconcile_tick_duration_seconds";
pub const RECONCILE_CONFLICTS_TOTAL: &str = "porta_reconcile_conflicts_total";
pub const ENDPOINTS_WRITES_TOTAL: &str = "porta_endpoints_writes_total";
pub const PUBLISHED_MEMBERS: &str = "porta_published_members";
pub const LEASE_RENEWALS_TOTAL: &str = "porta_lease_renewals_total";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        RECONCILE_TICKS_TOTAL,
        "Total number of reconciliation ticks by outcome"
    );
    describe_histogram!(
        RECONCILE_TICK_DURATION,
        "Reconciliation tick duration in seconds"
    );
    describe_counter!(
        RECONCILE_CONFLICTS_TOTAL,
        "Total number of lost compare-and-swap races on the endpoints record"
    );
    describe_counter!(
        ENDPOINTS_WRITES_TOTAL,
        "Total number of successful endpoints record writes"
    );
    describe_gauge!(
        PUBLISHED_MEMBERS,
        "Number of members in the last endpoints record written by this replica"
    );
    describe_counter!(
        LEASE_RENEWALS_TOTAL,
        "Total number of own lease creations and renewals"
    );

    tracing::info!("Metrics initialized");
}

/// Record a finished tick
pub fn record_tick(reconciler: &str, outcome: &str, duration_secs: f64) {
    counter!(RECONCILE_TICKS_TOTAL, "reconciler" => reconciler.to_string(), "outcome" => outcome.to_string()).increment(1);
    histogram!(RECONCILE_TICK_DURATION, "reconciler" => reconciler.to_string()).record(duration_secs);
}

/// Record a lost race on the endpoints record
pub fn record_conflict() {
    counter!(RECONCILE_CONFLICTS_TOTAL).increment(1);
}

/// Record a successful endpoints write and its member count
pub fn record_endpoints_write(members: usize) {
    counter!(ENDPOINTS_WRITES_TOTAL).increment(1);
    gauge!(PUBLISHED_MEMBERS).set(members as f64);
}

pub fn record_lease_renewal() {
    counter!(LEASE_RENEWALS_TOTAL).increment(1);
}

/// Timer helper for measuring tick duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_tick("lease", "published", 0.01);
        record_conflict();
        record_endpoints_write(3);
        record_lease_renewal();
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_secs() >= 0.01);
    }
}
