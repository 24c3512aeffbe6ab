//! # Informer
//!
//! Keeps an in-memory copy of a remote collection in sync and fans out every
//! change to subscribers.
//!
//! ## Sync cycle
//!
//! - `BulkSynchronizer`: paginated full listing, records the resume token
//! - `ChangeStreamProcessor`: watch from the token until disconnect, remote
//!   error or the reconcile window closes
//! - cooldown, then list again
//!
//! ## Usage
//!
//! ```rust,ignore
//! let source = ApiClient::new(&config.api, &config.resource)?;
//! let informer = Informer::new(source, config);
//!
//! informer.start().await?;
//! let mut events = informer.subscribe();
//! let pods = informer.list();
//! informer.stop().await?;
//! ```

pub mod admin_api;
pub mod api_client;
pub mod broadcast;
pub mod cache;
pub mod lister;
pub mod source;
pub mod watcher;

pub use api_client::*;
pub use broadcast::*;
pub use cache::*;
pub use lister::*;
pub use source::*;
pub use watcher::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use informer_core::prelude::*;
use informer_core::{projection, ErrorContext, ErrorContextExt, InformerMetrics, SyncConfig};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the sync loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Streaming,
    CoolingDown,
    Stopped,
}

/// Point-in-time statistics
#[derive(Debug, Clone, Serialize)]
pub struct InformerStats {
    pub resource: String,
    pub state: SyncState,
    pub cached_objects: usize,
    pub subscribers: usize,
    pub list_passes_ok: u64,
    pub list_passes_failed: u64,
    pub stream_runs: u64,
    pub events_processed: u64,
    pub last_stop_reason: Option<StopReason>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub resume_token: Option<ResumeToken>,
}

#[derive(Default)]
struct Counters {
    list_ok: AtomicU64,
    list_failed: AtomicU64,
    stream_runs: AtomicU64,
    events: Arc<AtomicU64>,
    last_stop_reason: Mutex<Option<StopReason>>,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
}

impl Counters {
    fn passes(&self) -> u64 {
        self.list_ok.load(Ordering::Relaxed) + self.list_failed.load(Ordering::Relaxed)
    }
}

/// Shared cache of one remote collection
pub struct Informer<S: ListWatchSource> {
    source: Arc<S>,
    config: InformerConfig,
    store: Arc<CacheStore>,
    broadcaster: Arc<EventBroadcaster>,
    projection: Arc<dyn Projection>,
    metrics: InformerMetrics,
    resume_token: Arc<RwLock<Option<ResumeToken>>>,
    state: Arc<watch::Sender<SyncState>>,
    counters: Arc<Counters>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl<S> Informer<S>
where
    S: ListWatchSource + 'static,
{
    /// Create new informer; the projection comes from `config.projection`
    pub fn new(source: S, config: InformerConfig) -> Self {
        let metrics = InformerMetrics::new(source.resource());
        let (state, _) = watch::channel(SyncState::Idle);

        Self {
            broadcaster: Arc::new(EventBroadcaster::new(config.broadcast.clone(), metrics.clone())),
            projection: projection::from_strip_fields(&config.projection.strip_fields),
            source: Arc::new(source),
            config,
            store: Arc::new(CacheStore::new()),
            metrics,
            resume_token: Arc::new(RwLock::new(None)),
            state: Arc::new(state),
            counters: Arc::new(Counters::default()),
            task: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }

    /// Builder pattern: replace the projection applied before caching
    pub fn with_projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projection = projection;
        self
    }

    /// Snapshot of every cached object
    pub fn list(&self) -> Vec<Arc<RawObject>> {
        self.store.snapshot()
    }

    /// Receive every event processed from now on
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Token the next watch will resume from
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.resume_token.read().clone()
    }

    /// Whether at least one list pass succeeded
    pub fn has_synced(&self) -> bool {
        self.counters.list_ok.load(Ordering::Relaxed) > 0
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> InformerStats {
        InformerStats {
            resource: self.source.resource().to_string(),
            state: self.state(),
            cached_objects: self.store.len(),
            subscribers: self.broadcaster.subscriber_count(),
            list_passes_ok: self.counters.list_ok.load(Ordering::Relaxed),
            list_passes_failed: self.counters.list_failed.load(Ordering::Relaxed),
            stream_runs: self.counters.stream_runs.load(Ordering::Relaxed),
            events_processed: self.counters.events.load(Ordering::Relaxed),
            last_stop_reason: *self.counters.last_stop_reason.lock(),
            last_sync_at: *self.counters.last_sync_at.lock(),
            resume_token: self.resume_token(),
        }
    }

    fn sync_loop(&self) -> SyncLoop<S> {
        let lister = BulkSynchronizer::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.projection),
            self.metrics.clone(),
        )
        .with_prune_on_resync(self.config.sync.prune_on_resync);

        let watcher = ChangeStreamProcessor::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.projection),
            self.metrics.clone(),
        )
        .with_event_counter(Arc::clone(&self.counters.events));

        SyncLoop {
            resource: self.source.resource().to_string(),
            lister,
            watcher,
            sync: self.config.sync.clone(),
            resume_token: Arc::clone(&self.resume_token),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
        }
    }
}

#[async_trait]
impl<S> Lifecycle for Informer<S>
where
    S: ListWatchSource + 'static,
{
    /// Spawn the sync loop and wait until its first list pass was attempted
    async fn start(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        let exited = CancellationToken::new();
        let baseline = self.counters.passes();
        {
            let mut task = self.task.lock();
            if task.as_ref().is_some_and(|t| !t.is_finished()) {
                return Err(InformerError::lifecycle(format!(
                    "informer for {} is already running",
                    self.source.resource()
                )));
            }

            self.state.send_replace(SyncState::Idle);
            *self.cancel.lock() = Some(cancel.clone());
            // fires when the task ends for any reason, panics included
            let exit_guard = exited.clone().drop_guard();
            let sync_loop = self.sync_loop();
            let loop_cancel = cancel.clone();
            *task = Some(tokio::spawn(async move {
                let _exit_guard = exit_guard;
                sync_loop.run(loop_cancel).await;
            }));
        }

        info!(resource = self.source.resource(), "Informer started");

        let counters = Arc::clone(&self.counters);
        let mut state = self.state.subscribe();
        let first_pass = async move {
            state
                .wait_for(|s| {
                    !matches!(s, SyncState::Idle | SyncState::Syncing)
                        || counters.passes() > baseline
                })
                .await
                .map(|_| ())
        };

        tokio::select! {
            biased;
            result = first_pass => {
                result.map_err(|_| InformerError::Internal("sync state channel closed".into()))?;
            }
            _ = cancel.cancelled() => {}
            _ = exited.cancelled() => {
                if !cancel.is_cancelled() && self.counters.passes() <= baseline {
                    let task = self.task.lock().take();
                    if let Some(task) = task {
                        if let Err(e) = task.await {
                            error!(error = %e, "Sync task failed");
                        }
                    }
                    error!(resource = self.source.resource(), "Sync task exited before its first list pass");
                    return Err(InformerError::Internal(
                        "sync task exited before its first list pass".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Cancel the sync loop, wait for it, then close every subscription
    async fn stop(&self) -> Result<()> {
        let cancel = self.cancel.lock().take();
        let task = self.task.lock().take();

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        if let Some(mut task) = task {
            let timeout = self.config.sync.shutdown_timeout;
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => debug!("Sync task finished"),
                Ok(Err(e)) => error!(error = %e, "Sync task failed"),
                Err(_) => {
                    warn!(timeout = ?timeout, "Sync task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        self.broadcaster.close_all();
        self.state.send_replace(SyncState::Stopped);
        info!(
            resource = self.source.resource(),
            cached = self.store.len(),
            events = self.counters.events.load(Ordering::Relaxed),
            "Informer stopped"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Everything the background task owns
struct SyncLoop<S: ListWatchSource> {
    resource: String,
    lister: BulkSynchronizer<S>,
    watcher: ChangeStreamProcessor<S>,
    sync: SyncConfig,
    resume_token: Arc<RwLock<Option<ResumeToken>>>,
    state: Arc<watch::Sender<SyncState>>,
    counters: Arc<Counters>,
}

impl<S: ListWatchSource> SyncLoop<S> {
    async fn run(self, cancel: CancellationToken) {
        info!(resource = %self.resource, "Sync loop started");

        while !cancel.is_cancelled() {
            self.state.send_replace(SyncState::Syncing);
            match self
                .lister
                .run(self.sync.page_limit, &cancel)
                .await
                .with_context(ErrorContext::new("informer", "list").with_resource(&self.resource))
            {
                Ok(outcome) => {
                    // a completed pass replaces the token even when it carried none
                    *self.resume_token.write() = outcome.resume_token;
                    *self.counters.last_sync_at.lock() = Some(Utc::now());
                    self.counters.list_ok.fetch_add(1, Ordering::Relaxed);
                }
                Err(InformerError::Shutdown) => break,
                Err(_) => {
                    self.counters.list_failed.fetch_add(1, Ordering::Relaxed);
                }
            }

            self.state.send_replace(SyncState::Streaming);
            let token = self.resume_token.read().clone();
            self.counters.stream_runs.fetch_add(1, Ordering::Relaxed);
            let stopped = self
                .watcher
                .run(token.as_ref(), self.sync.reconcile_timeout, &cancel)
                .await
                .with_context(
                    ErrorContext::new("informer", "watch")
                        .with_resource(&self.resource)
                        .with_resume_token(token.as_ref().map(ResumeToken::as_str)),
                );
            if let Ok(reason) = stopped {
                *self.counters.last_stop_reason.lock() = Some(reason);
                if reason == StopReason::Cancelled {
                    break;
                }
            }

            self.state.send_replace(SyncState::CoolingDown);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.sync.cooldown) => {}
            }
        }

        info!(resource = %self.resource, "Sync loop exited");
    }
}
