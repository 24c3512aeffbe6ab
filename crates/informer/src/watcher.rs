//! Incremental change stream processing
//!
//! One run opens a watch from the recorded resume token and applies every
//! event to the cache, then hands it to the broadcaster. A run never outlives
//! its reconcile window: when the deadline fires the stream is dropped, which
//! closes the connection, and the supervisor re-lists.

use crate::broadcast::EventBroadcaster;
use crate::cache::CacheStore;
use futures::StreamExt;
use informer_core::prelude::*;
use informer_core::InformerMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Why a stream run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source closed the stream
    Disconnected,
    /// The source sent an `ERROR` event
    RemoteError,
    /// The reconcile window elapsed
    ReconcileTimeout,
    /// The informer was stopped
    Cancelled,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::RemoteError => "remote_error",
            Self::ReconcileTimeout => "reconcile_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Change stream processor
pub struct ChangeStreamProcessor<S: ListWatchSource> {
    source: Arc<S>,
    store: Arc<CacheStore>,
    broadcaster: Arc<EventBroadcaster>,
    projection: Arc<dyn Projection>,
    metrics: InformerMetrics,
    processed: Arc<AtomicU64>,
}

impl<S: ListWatchSource> ChangeStreamProcessor<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<CacheStore>,
        broadcaster: Arc<EventBroadcaster>,
        projection: Arc<dyn Projection>,
        metrics: InformerMetrics,
    ) -> Self {
        Self {
            source,
            store,
            broadcaster,
            projection,
            metrics,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Builder pattern: count processed events into a shared counter
    pub fn with_event_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.processed = counter;
        self
    }

    /// Events processed across all runs
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Consume one stream until it ends, errors, times out or is cancelled
    ///
    /// Transport and decode failures, whether opening the stream or inside it,
    /// are returned as errors; every other way of ending is a [`StopReason`].
    pub async fn run(
        &self,
        from: Option<&ResumeToken>,
        max_duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<StopReason> {
        let resource = self.source.resource();
        let deadline_sleep = sleep_until(Instant::now() + max_duration);
        tokio::pin!(deadline_sleep);

        // the window also bounds a connection that never finishes opening
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.finish(StopReason::Cancelled)),
            _ = &mut deadline_sleep => return Ok(self.finish(StopReason::ReconcileTimeout)),
            opened = self.source.watch(from) => opened?,
        };

        info!(
            resource,
            resume_token = ?from.map(ResumeToken::as_str),
            max_duration = ?max_duration,
            "Watch stream opened"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.finish(StopReason::Cancelled)),
                _ = &mut deadline_sleep => return Ok(self.finish(StopReason::ReconcileTimeout)),
                next = stream.next() => next,
            };

            let event = match next {
                None => return Ok(self.finish(StopReason::Disconnected)),
                Some(Err(e)) => {
                    warn!(error = %e, resource, "Watch stream failed");
                    self.metrics.record_error(e.kind());
                    return Err(e);
                }
                Some(Ok(event)) => event,
            };

            let terminal = self.apply(&event);
            self.metrics.record_event(event.kind.label());
            self.processed.fetch_add(1, Ordering::Relaxed);
            self.broadcaster.publish(event);

            if terminal {
                return Ok(self.finish(StopReason::RemoteError));
            }
        }
    }

    /// Apply the cache effect of `event`; returns true when the stream must stop
    fn apply(&self, event: &StreamEvent) -> bool {
        let resource = self.source.resource();

        match &event.kind {
            EventKind::Added | EventKind::Modified => match event.uid() {
                Some(uid) => {
                    trace!(resource, uid = %uid, kind = %event.kind, "Applying upsert");
                    self.store.upsert(uid, self.projection.project(event.object.clone()));
                    self.metrics.set_cache_size(self.store.len());
                }
                None => warn!(resource, kind = %event.kind, "Event object has no uid, not cached"),
            },
            EventKind::Deleted => match event.uid() {
                Some(uid) => {
                    if self.store.evict(&uid).is_none() {
                        debug!(resource, uid = %uid, "Deleted object was not cached");
                    }
                    self.metrics.set_cache_size(self.store.len());
                }
                None => warn!(resource, "Delete event object has no uid, not cached"),
            },
            EventKind::Error => {
                warn!(
                    resource,
                    message = event.status_message().unwrap_or("unknown"),
                    "Watch stream reported an error"
                );
                return true;
            }
            EventKind::Unrecognized(tag) => {
                warn!(resource, tag = %tag, "Unrecognized watch event type");
            }
        }
        false
    }

    fn finish(&self, reason: StopReason) -> StopReason {
        self.metrics.record_stream_stop(reason.label());
        info!(resource = self.source.resource(), reason = %reason, "Watch stream ended");
        reason
    }
}
