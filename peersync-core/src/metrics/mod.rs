//! Metrics for the synchronization engine
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op, so library users opt in by installing
//! whatever exporter they like.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Sync cycles run by the host
pub const SYNC_CYCLES: &str = "sync.cycles.total";
/// Patch batches and full states broadcast by the host
pub const SYNC_PATCHES_BROADCAST: &str = "sync.patches.broadcast";
/// Patches a mirror could not apply
pub const SYNC_PATCHES_FAILED: &str = "sync.patches.failed";
/// Duration of one sync cycle
pub const SYNC_CYCLE_DURATION: &str = "sync.cycle.duration_ms";
/// Actions executed against the state, local or remote
pub const ACTIONS_APPLIED: &str = "sync.actions.applied";
/// Actions rejected as unknown or whose handler failed
pub const ACTIONS_REJECTED: &str = "sync.actions.rejected";
/// Observer callbacks that failed or panicked
pub const OBSERVER_FAILURES: &str = "sync.observer.failures";
/// Host elections resolved locally
pub const HOST_ELECTED: &str = "election.host.elected";
/// Conflicting host announcements resolved by tiebreak
pub const CONFLICTS_RESOLVED: &str = "election.conflicts.resolved";
/// Peers evicted for silence
pub const PEERS_EVICTED: &str = "health.peers.evicted";
/// Peers currently known to the health monitor
pub const PEERS_KNOWN: &str = "health.peers.known";

/// Register descriptions for every metric this crate records
pub fn init_metrics() {
    describe_counter!(SYNC_CYCLES, "Number of sync cycles run by the host");
    describe_counter!(SYNC_PATCHES_BROADCAST, "Number of patch batches broadcast by the host");
    describe_counter!(SYNC_PATCHES_FAILED, "Number of patches mirrors failed to apply");
    describe_histogram!(SYNC_CYCLE_DURATION, "Sync cycle duration in milliseconds");

    describe_counter!(ACTIONS_APPLIED, "Number of actions applied to state");
    describe_counter!(ACTIONS_REJECTED, "Number of actions rejected or failed");
    describe_counter!(OBSERVER_FAILURES, "Number of observer callbacks that failed");

    describe_counter!(HOST_ELECTED, "Number of host elections resolved");
    describe_counter!(CONFLICTS_RESOLVED, "Number of conflicting host announcements resolved");

    describe_counter!(PEERS_EVICTED, "Number of peers evicted after missing pings");
    describe_gauge!(PEERS_KNOWN, "Number of peers currently known to the health monitor");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Start timing
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the elapsed milliseconds
    pub fn stop(self) {
        record_histogram(self.name, self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_counter(SYNC_CYCLES, 1);
        record_gauge(PEERS_KNOWN, 3.0);
        record_histogram(SYNC_CYCLE_DURATION, 0.5);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new(SYNC_CYCLE_DURATION);
        std::thread::sleep(std::time::Duration::from_millis(1));
        timer.stop();
    }
}
