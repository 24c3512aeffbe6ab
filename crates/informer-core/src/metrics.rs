//! Metrics for the informer
//!
//! Emits through the `metrics` facade; the exporter is chosen by the binary.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    pub const EVENTS_TOTAL: &str = "informer_watch_events_total";
    pub const LIST_PASSES_TOTAL: &str = "informer_list_passes_total";
    pub const LIST_DURATION: &str = "informer_list_duration_seconds";
    pub const LIST_ITEMS_TOTAL: &str = "informer_list_items_total";
    pub const CACHE_OBJECTS: &str = "informer_cache_objects";
    pub const STREAM_STOPS_TOTAL: &str = "informer_watch_stops_total";
    pub const SUBSCRIBERS: &str = "informer_subscribers";
    pub const EVENTS_DROPPED_TOTAL: &str = "informer_subscriber_events_dropped_total";
    pub const SUBSCRIBERS_DISCONNECTED_TOTAL: &str = "informer_subscribers_disconnected_total";
    pub const ERRORS_TOTAL: &str = "informer_errors_total";
}

/// Labels for metrics
pub mod labels {
    pub const RESOURCE: &str = "resource";
    pub const KIND: &str = "kind";
    pub const OUTCOME: &str = "outcome";
    pub const REASON: &str = "reason";
    pub const ERROR_TYPE: &str = "error_type";
}

/// Informer metrics, labelled by resource
#[derive(Clone)]
pub struct InformerMetrics {
    resource: String,
}

impl InformerMetrics {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }

    /// Record a watch event
    pub fn record_event(&self, kind: &'static str) {
        counter!(
            names::EVENTS_TOTAL,
            labels::RESOURCE => self.resource.clone(),
            labels::KIND => kind,
        )
        .increment(1);
    }

    /// Record a finished list pass
    pub fn record_list_pass(&self, outcome: &'static str, items: u64) {
        counter!(
            names::LIST_PASSES_TOTAL,
            labels::RESOURCE => self.resource.clone(),
            labels::OUTCOME => outcome,
        )
        .increment(1);
        counter!(
            names::LIST_ITEMS_TOTAL,
            labels::RESOURCE => self.resource.clone(),
        )
        .increment(items);
    }

    /// Record list duration
    pub fn record_list_duration(&self, duration: Duration) {
        histogram!(
            names::LIST_DURATION,
            labels::RESOURCE => self.resource.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Update cached object count
    pub fn set_cache_size(&self, size: usize) {
        gauge!(
            names::CACHE_OBJECTS,
            labels::RESOURCE => self.resource.clone(),
        )
        .set(size as f64);
    }

    /// Record why a watch ended
    pub fn record_stream_stop(&self, reason: &'static str) {
        counter!(
            names::STREAM_STOPS_TOTAL,
            labels::RESOURCE => self.resource.clone(),
            labels::REASON => reason,
        )
        .increment(1);
    }

    /// Update subscriber count
    pub fn set_subscribers(&self, count: usize) {
        gauge!(
            names::SUBSCRIBERS,
            labels::RESOURCE => self.resource.clone(),
        )
        .set(count as f64);
    }

    /// Record an event dropped for a full subscriber
    pub fn record_event_dropped(&self) {
        counter!(
            names::EVENTS_DROPPED_TOTAL,
            labels::RESOURCE => self.resource.clone(),
        )
        .increment(1);
    }

    /// Record a subscriber closed for lagging
    pub fn record_subscriber_disconnected(&self) {
        counter!(
            names::SUBSCRIBERS_DISCONNECTED_TOTAL,
            labels::RESOURCE => self.resource.clone(),
        )
        .increment(1);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &'static str) {
        counter!(
            names::ERRORS_TOTAL,
            labels::RESOURCE => self.resource.clone(),
            labels::ERROR_TYPE => error_type,
        )
        .increment(1);
    }
}

/// Measures one operation and hands the elapsed time to `record`
///
/// Records exactly once: on `finish`, or on drop when the operation bails out
/// early through `?` or `return`.
pub struct LatencyTimer<F: FnOnce(Duration)> {
    started: Instant,
    record: Option<F>,
}

impl<F: FnOnce(Duration)> LatencyTimer<F> {
    pub fn start(record: F) -> Self {
        Self {
            started: Instant::now(),
            record: Some(record),
        }
    }

    /// Record now and return the measured duration
    pub fn finish(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(record) = self.record.take() {
            record(elapsed);
        }
        elapsed
    }
}

impl<F: FnOnce(Duration)> Drop for LatencyTimer<F> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            record(self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer_records_once() {
        let mut recorded = Vec::new();
        {
            let timer = LatencyTimer::start(|d| recorded.push(d));
            std::thread::sleep(Duration::from_millis(10));
            timer.finish();
        }
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0] >= Duration::from_millis(10));
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        let mut recorded = None;
        {
            let _timer = LatencyTimer::start(|d| recorded = Some(d));
        }
        assert!(recorded.is_some());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = InformerMetrics::new("pods");
        metrics.record_event("added");
        metrics.record_list_pass("ok", 3);
        metrics.set_cache_size(3);
    }
}
