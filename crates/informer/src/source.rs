//! Scripted list/watch source
//!
//! `MockSource` replays queued list replies and watch streams and records every
//! request it receives. It backs the informer's own tests and is handy for
//! exercising consumers without an API server.

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use informer_core::prelude::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted reply to a list call
#[derive(Debug, Clone)]
pub enum MockListReply {
    Page(ListPage),
    Missing,
    Fail(String),
}

/// One scripted watch stream item
#[derive(Debug, Clone)]
pub enum MockWatchItem {
    Event(StreamEvent),
    Fail(String),
}

/// How a scripted watch stream behaves after its last item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Remote closes the connection
    Close,
    /// Connection stays open without delivering anything
    Hang,
}

#[derive(Debug, Clone)]
struct MockWatch {
    items: Vec<MockWatchItem>,
    end: StreamEnd,
}

/// Recorded list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub limit: Option<u32>,
    pub cursor: Option<PageCursor>,
}

/// Scripted change source for testing
///
/// An exhausted list script answers `Missing`; an exhausted watch script opens
/// a stream that hangs until it is dropped.
pub struct MockSource {
    resource: String,
    lists: Mutex<VecDeque<MockListReply>>,
    watches: Mutex<VecDeque<MockWatch>>,
    list_requests: Mutex<Vec<ListRequest>>,
    watch_requests: Mutex<Vec<Option<ResumeToken>>>,
    list_times: Mutex<Vec<Instant>>,
    watch_times: Mutex<Vec<Instant>>,
    list_delay: Mutex<Duration>,
    watch_failures: AtomicUsize,
    watch_stalls: AtomicUsize,
}

impl MockSource {
    /// Create new mock source
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            lists: Mutex::new(VecDeque::new()),
            watches: Mutex::new(VecDeque::new()),
            list_requests: Mutex::new(Vec::new()),
            watch_requests: Mutex::new(Vec::new()),
            list_times: Mutex::new(Vec::new()),
            watch_times: Mutex::new(Vec::new()),
            list_delay: Mutex::new(Duration::ZERO),
            watch_failures: AtomicUsize::new(0),
            watch_stalls: AtomicUsize::new(0),
        }
    }

    /// Queue a list page
    pub fn push_page(&self, page: ListPage) -> &Self {
        self.lists.lock().push_back(MockListReply::Page(page));
        self
    }

    /// Queue an arbitrary list reply
    pub fn push_list_reply(&self, reply: MockListReply) -> &Self {
        self.lists.lock().push_back(reply);
        self
    }

    /// Queue a watch stream delivering `events`
    pub fn push_watch(&self, events: Vec<StreamEvent>, end: StreamEnd) -> &Self {
        let items = events.into_iter().map(MockWatchItem::Event).collect();
        self.push_watch_items(items, end)
    }

    /// Queue a watch stream with raw items (events or mid-stream failures)
    pub fn push_watch_items(&self, items: Vec<MockWatchItem>, end: StreamEnd) -> &Self {
        self.watches.lock().push_back(MockWatch { items, end });
        self
    }

    /// Make the next `count` watch calls fail before a stream is opened
    pub fn fail_next_watches(&self, count: usize) -> &Self {
        self.watch_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Make the next `count` watch calls never finish opening
    pub fn stall_next_watches(&self, count: usize) -> &Self {
        self.watch_stalls.store(count, Ordering::SeqCst);
        self
    }

    /// Delay every list reply by `delay`
    pub fn delay_lists(&self, delay: Duration) -> &Self {
        *self.list_delay.lock() = delay;
        self
    }

    /// Every list request received so far
    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.list_requests.lock().clone()
    }

    /// Resume tokens of every watch request received so far
    pub fn watch_requests(&self) -> Vec<Option<ResumeToken>> {
        self.watch_requests.lock().clone()
    }

    /// When each list reply was handed out
    pub fn list_times(&self) -> Vec<Instant> {
        self.list_times.lock().clone()
    }

    /// When each watch request arrived
    pub fn watch_times(&self) -> Vec<Instant> {
        self.watch_times.lock().clone()
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl HealthCheck for MockSource {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "mock_source"
    }
}

#[async_trait]
impl ListWatchSource for MockSource {
    async fn list(&self, limit: Option<u32>, cursor: Option<&PageCursor>) -> Result<Option<ListPage>> {
        self.list_requests.lock().push(ListRequest {
            limit,
            cursor: cursor.cloned(),
        });

        let delay = *self.list_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.list_times.lock().push(Instant::now());

        match self.lists.lock().pop_front() {
            Some(MockListReply::Page(page)) => Ok(Some(page)),
            Some(MockListReply::Missing) | None => Ok(None),
            Some(MockListReply::Fail(message)) => Err(InformerError::transport(message)),
        }
    }

    async fn watch(&self, from: Option<&ResumeToken>) -> Result<EventStream> {
        self.watch_requests.lock().push(from.cloned());
        self.watch_times.lock().push(Instant::now());

        let pending_stalls = self.watch_stalls.load(Ordering::SeqCst);
        if pending_stalls > 0 {
            self.watch_stalls.store(pending_stalls - 1, Ordering::SeqCst);
            return future::pending().await;
        }

        let pending_failures = self.watch_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.watch_failures.store(pending_failures - 1, Ordering::SeqCst);
            return Err(InformerError::transport("watch refused"));
        }

        let script = self.watches.lock().pop_front().unwrap_or(MockWatch {
            items: Vec::new(),
            end: StreamEnd::Hang,
        });

        let items = stream::iter(script.items.into_iter().map(|item| match item {
            MockWatchItem::Event(event) => Ok(event),
            MockWatchItem::Fail(message) => Err(InformerError::transport(message)),
        }));

        let stream = match script.end {
            StreamEnd::Close => items.boxed(),
            StreamEnd::Hang => items.chain(stream::pending()).boxed(),
        };
        Ok(stream)
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_source_replays_script() {
        let source = MockSource::new("pods");
        source
            .push_page(ListPage::new(vec![json!({"metadata": {"uid": "1"}})]).with_resource_version("7"))
            .push_watch(vec![StreamEvent::added(json!({"metadata": {"uid": "2"}}))], StreamEnd::Close);

        let page = source.list(Some(10), None).await.unwrap().unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(source.list(None, None).await.unwrap().is_none());

        let token = ResumeToken::new("7");
        let mut stream = source.watch(Some(&token)).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Added);
        assert!(stream.next().await.is_none());

        assert_eq!(source.list_requests()[0], ListRequest { limit: Some(10), cursor: None });
        assert_eq!(source.watch_requests(), vec![Some(token)]);
    }

    #[tokio::test]
    async fn test_mock_source_watch_failures() {
        let source = MockSource::new("pods");
        source.fail_next_watches(1);

        assert!(source.watch(None).await.is_err());
        assert!(source.watch(None).await.is_ok());
    }
}
