//! Paginated full listing into the cache
//!
//! A pass walks every page of the collection, projects each item and upserts
//! it. The resume token is taken from the first page only; later pages of the
//! same listing may omit it. Nothing is ever cleared before repopulating, so a
//! failed pass leaves the previous contents in place.

use crate::cache::CacheStore;
use informer_core::prelude::*;
use informer_core::{InformerMetrics, LatencyTimer};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a list pass that produced at least a first page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Token recorded from the first page
    pub resume_token: Option<ResumeToken>,
    /// Pages applied
    pub pages: usize,
    /// Items upserted
    pub items: usize,
    /// Whether pagination ran to the last page
    pub complete: bool,
    /// Objects evicted because a complete listing no longer contained them
    pub pruned: usize,
}

/// Bulk synchronizer
pub struct BulkSynchronizer<S: ListWatchSource> {
    source: Arc<S>,
    store: Arc<CacheStore>,
    projection: Arc<dyn Projection>,
    metrics: InformerMetrics,
    prune_on_resync: bool,
}

impl<S: ListWatchSource> BulkSynchronizer<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<CacheStore>,
        projection: Arc<dyn Projection>,
        metrics: InformerMetrics,
    ) -> Self {
        Self {
            source,
            store,
            projection,
            metrics,
            prune_on_resync: false,
        }
    }

    /// Builder pattern: evict objects missing from a complete listing
    pub fn with_prune_on_resync(mut self, prune: bool) -> Self {
        self.prune_on_resync = prune;
        self
    }

    /// Run one full pass
    ///
    /// Fails without touching the cache when the first page is missing or
    /// empty, or when fetching it fails. Failures on later pages only end
    /// pagination early.
    pub async fn run(&self, page_limit: Option<u32>, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let timer = LatencyTimer::start(|elapsed| self.metrics.record_list_duration(elapsed));
        let resource = self.source.resource();

        let first = self.fetch(page_limit, None, cancel).await?;
        let first = match first {
            None => {
                self.metrics.record_list_pass("empty", 0);
                return Err(InformerError::empty_response(format!(
                    "no list response for {}",
                    resource
                )));
            }
            Some(page) if page.items.is_empty() => {
                self.metrics.record_list_pass("empty", 0);
                return Err(InformerError::empty_response(format!(
                    "list response for {} has no items",
                    resource
                )));
            }
            Some(page) => page,
        };

        let resume_token = first.resource_version.clone();
        if resume_token.is_none() {
            warn!(resource, "First list page carried no resume token");
        }

        let mut seen = HashSet::new();
        let mut items = self.apply(first.items, &mut seen);
        let mut pages = 1;
        let mut cursor = first.next_cursor;
        let mut complete = true;

        while let Some(next) = cursor.take() {
            if cancel.is_cancelled() {
                return Err(InformerError::Shutdown);
            }

            match self.fetch(page_limit, Some(&next), cancel).await {
                Ok(Some(page)) => {
                    items += self.apply(page.items, &mut seen);
                    pages += 1;
                    cursor = page.next_cursor;
                    debug!(resource, pages, items, "Applied list page");
                }
                Ok(None) => {
                    warn!(resource, pages, "Missing list page, stopping pagination");
                    complete = false;
                }
                Err(InformerError::Shutdown) => return Err(InformerError::Shutdown),
                Err(e) => {
                    warn!(error = %e, resource, pages, "List page failed, stopping pagination");
                    self.metrics.record_error(e.kind());
                    complete = false;
                }
            }
        }

        let pruned = if self.prune_on_resync && complete {
            self.store.retain_only(&seen)
        } else {
            0
        };

        let elapsed = timer.finish();
        self.metrics
            .record_list_pass(if complete { "complete" } else { "partial" }, items as u64);
        self.metrics.set_cache_size(self.store.len());

        info!(
            resource,
            resume_token = ?resume_token.as_ref().map(ResumeToken::as_str),
            pages,
            items,
            pruned,
            complete,
            elapsed = ?elapsed,
            "List pass finished"
        );

        Ok(SyncOutcome {
            resume_token,
            pages,
            items,
            complete,
            pruned,
        })
    }

    async fn fetch(
        &self,
        page_limit: Option<u32>,
        cursor: Option<&PageCursor>,
        cancel: &CancellationToken,
    ) -> Result<Option<ListPage>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InformerError::Shutdown),
            page = self.source.list(page_limit, cursor) => page,
        }
    }

    fn apply(&self, objects: Vec<RawObject>, seen: &mut HashSet<Uid>) -> usize {
        let mut applied = 0;
        for object in objects {
            let Some(uid) = Uid::of(&object) else {
                warn!(resource = self.source.resource(), "Listed object has no uid, skipping");
                continue;
            };
            seen.insert(uid.clone());
            self.store.upsert(uid, self.projection.project(object));
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockListReply, MockSource};
    use informer_core::IdentityProjection;
    use informer_core::StripFieldsProjection;
    use serde_json::json;

    fn pod(uid: &str) -> RawObject {
        json!({"metadata": {"uid": uid, "managedFields": [1, 2, 3]}})
    }

    fn lister(source: &Arc<MockSource>, store: &Arc<CacheStore>) -> BulkSynchronizer<MockSource> {
        BulkSynchronizer::new(
            Arc::clone(source),
            Arc::clone(store),
            Arc::new(IdentityProjection),
            InformerMetrics::new("test"),
        )
    }

    #[tokio::test]
    async fn test_pagination_completeness() {
        let source = Arc::new(MockSource::new("pods"));
        source
            .push_page(
                ListPage::new(vec![pod("a"), pod("b")])
                    .with_resource_version("100")
                    .with_next_cursor("p2"),
            )
            .push_page(
                ListPage::new(vec![pod("c")])
                    .with_resource_version("999")
                    .with_next_cursor("p3"),
            )
            .push_page(ListPage::new(vec![pod("d"), pod("a")]));
        let store = Arc::new(CacheStore::new());

        let outcome = lister(&source, &store)
            .run(Some(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.resume_token, Some(ResumeToken::new("100")));
        assert_eq!(outcome.pages, 3);
        assert!(outcome.complete);
        assert_eq!(store.len(), 4);

        let requests = source.list_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].cursor, None);
        assert_eq!(requests[1].cursor, Some(PageCursor::new("p2")));
        assert_eq!(requests[2].cursor, Some(PageCursor::new("p3")));
        assert!(requests.iter().all(|r| r.limit == Some(2)));
    }

    #[tokio::test]
    async fn test_abandon_on_empty_keeps_cache() {
        let source = Arc::new(MockSource::new("pods"));
        source
            .push_page(ListPage::new(vec![]).with_resource_version("5"))
            .push_list_reply(MockListReply::Missing);
        let store = Arc::new(CacheStore::new());
        store.upsert(Uid::new("old"), pod("old"));
        let lister = lister(&source, &store);

        let err = lister.run(None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, InformerError::EmptyResponse { .. }));
        let err = lister.run(None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, InformerError::EmptyResponse { .. }));

        assert_eq!(store.len(), 1);
        assert!(store.get(&Uid::new("old")).is_some());
    }

    #[tokio::test]
    async fn test_first_page_failure_propagates() {
        let source = Arc::new(MockSource::new("pods"));
        source.push_list_reply(MockListReply::Fail("connection refused".into()));
        let store = Arc::new(CacheStore::new());

        let err = lister(&source, &store)
            .run(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InformerError::Transport { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_later_page_failure_keeps_partial_results() {
        let source = Arc::new(MockSource::new("pods"));
        source
            .push_page(
                ListPage::new(vec![pod("a")])
                    .with_resource_version("1")
                    .with_next_cursor("p2"),
            )
            .push_list_reply(MockListReply::Fail("expired continue token".into()));
        let store = Arc::new(CacheStore::new());

        let outcome = lister(&source, &store)
            .run(None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.complete);
        assert_eq!(outcome.resume_token, Some(ResumeToken::new("1")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_projection_applied() {
        let source = Arc::new(MockSource::new("pods"));
        source.push_page(ListPage::new(vec![pod("a")]).with_resource_version("1"));
        let store = Arc::new(CacheStore::new());

        BulkSynchronizer::new(
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::new(StripFieldsProjection::new(["metadata.managedFields"])),
            InformerMetrics::new("test"),
        )
        .run(None, &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(*store.get(&Uid::new("a")).unwrap(), json!({"metadata": {"uid": "a"}}));
    }

    #[tokio::test]
    async fn test_prune_on_resync() {
        let source = Arc::new(MockSource::new("pods"));
        source
            .push_page(ListPage::new(vec![pod("a")]).with_resource_version("2"))
            .push_page(ListPage::new(vec![pod("a")]).with_resource_version("3").with_next_cursor("p2"))
            .push_list_reply(MockListReply::Fail("boom".into()));
        let store = Arc::new(CacheStore::new());
        store.upsert(Uid::new("gone"), pod("gone"));
        let lister = lister(&source, &store).with_prune_on_resync(true);

        let outcome = lister.run(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.pruned, 1);
        assert!(store.get(&Uid::new("gone")).is_none());

        // incomplete listing never prunes
        store.upsert(Uid::new("gone"), pod("gone"));
        let outcome = lister.run(None, &CancellationToken::new()).await.unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.pruned, 0);
        assert!(store.get(&Uid::new("gone")).is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let source = Arc::new(MockSource::new("pods"));
        source.push_page(ListPage::new(vec![pod("a")]));
        let store = Arc::new(CacheStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = lister(&source, &store).run(None, &cancel).await.unwrap_err();
        assert!(matches!(err, InformerError::Shutdown));
        assert!(store.is_empty());
    }
}
