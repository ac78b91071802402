//! Metrics recorded through the `metrics` facade
//!
//! No recorder is installed here; an application that wants the numbers
//! installs its own before calling [`init_metrics`].

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::{Duration, Instant};

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    // Transport
    describe_counter!("forcesync_channel_open_total", "Channel transitions to open");
    describe_counter!("forcesync_connect_failures_total", "Failed connection attempts");
    describe_counter!("forcesync_dropped_sends_total", "Messages dropped because the channel was not open");

    // Correlator
    describe_counter!("forcesync_rpc_calls_total", "Correlated calls issued, by action");
    describe_counter!("forcesync_rpc_timeouts_total", "Correlated calls that got no reply in time, by action");
    describe_counter!("forcesync_malformed_frames_total", "Inbound frames that were not JSON objects");
    describe_counter!("forcesync_handler_failures_total", "Action handlers that returned an error or panicked");

    // Replication
    describe_counter!("forcesync_save_outcomes_total", "Resolved save tickets, by outcome");
    describe_counter!("forcesync_coalesced_saves_total", "Saves merged into an already pending job");
    describe_counter!("forcesync_ownership_conflicts_total", "Forces re-keyed after a not_owner reply");
    describe_histogram!("forcesync_flush_duration_ms", "Time from timer expiry to save resolution");
    describe_histogram!("forcesync_load_duration_ms", "Time to load and reconcile one force");
}

pub fn record_channel_open() {
    counter!("forcesync_channel_open_total").increment(1);
}

pub fn record_connect_failure() {
    counter!("forcesync_connect_failures_total").increment(1);
}

pub fn record_dropped_send() {
    counter!("forcesync_dropped_sends_total").increment(1);
}

pub fn record_rpc_call(action: &str) {
    counter!("forcesync_rpc_calls_total", "action" => action.to_string()).increment(1);
}

pub fn record_rpc_timeout(action: &str) {
    counter!("forcesync_rpc_timeouts_total", "action" => action.to_string()).increment(1);
}

pub fn record_malformed_frame() {
    counter!("forcesync_malformed_frames_total").increment(1);
}

pub fn record_handler_failure() {
    counter!("forcesync_handler_failures_total").increment(1);
}

/// One increment per resolved waiter
pub fn record_save_outcome(outcome: &'static str, waiters: usize) {
    counter!("forcesync_save_outcomes_total", "outcome" => outcome).increment(waiters as u64);
}

pub fn record_coalesced_save() {
    counter!("forcesync_coalesced_saves_total").increment(1);
}

pub fn record_ownership_conflict() {
    counter!("forcesync_ownership_conflicts_total").increment(1);
}

pub fn record_flush_duration(elapsed: Duration) {
    histogram!("forcesync_flush_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// Records elapsed milliseconds into a histogram when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn stop(self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        init_metrics();
        record_rpc_call("saveForce");
        record_save_outcome("replicated", 3);
        record_flush_duration(Duration::from_millis(12));
        Timer::new("forcesync_load_duration_ms").stop();
    }
}
