//! Strategy Pattern Traits for the informer
//!
//! The informer is written against these abstractions so that the remote
//! source (HTTP API server, scripted mock, ...) can be swapped at compile time.
//!
//! ## Strategy Hierarchy
//!
//! ```text
//! Lifecycle (start/stop)
//!     └── Informer
//!
//! HealthCheck
//!     └── ListWatchSource (list pages + watch stream)
//!             └── ApiClient, MockSource, ...
//! ```

use crate::error::Result;
use crate::message::{ListPage, PageCursor, ResumeToken, StreamEvent};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Type alias for boxed async streams of watch events
///
/// Dropping the stream closes the underlying connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

// ============================================================================
// Lifecycle Management
// ============================================================================

/// Lifecycle management for components
///
/// Provides startup and cooperative shutdown semantics.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Start the component
    async fn start(&self) -> Result<()>;

    /// Stop the component
    ///
    /// May be called even if start() failed or was never called.
    async fn stop(&self) -> Result<()>;

    /// Check if the component is running
    fn is_running(&self) -> bool;
}

/// Health check capability
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform health check
    ///
    /// Returns Ok(()) if healthy, Err with details if not.
    async fn health_check(&self) -> Result<()>;

    /// Get component name for health reporting
    fn component_name(&self) -> &'static str;
}

// ============================================================================
// Source Strategy
// ============================================================================

/// Remote collection exposing a paginated list and an incremental watch
///
/// Implementations:
/// - `ApiClient`: Kubernetes-style HTTP API server
/// - `MockSource`: Scripted pages and streams (for testing)
#[async_trait]
pub trait ListWatchSource: HealthCheck {
    /// Fetch one page of the collection
    ///
    /// `limit` bounds the number of items per page; `cursor` continues a
    /// listing started by an earlier call within the same pass. `Ok(None)`
    /// means the source returned no response at all.
    async fn list(&self, limit: Option<u32>, cursor: Option<&PageCursor>) -> Result<Option<ListPage>>;

    /// Open a change stream starting after `from`
    ///
    /// With no token the source picks its own starting point.
    async fn watch(&self, from: Option<&ResumeToken>) -> Result<EventStream>;

    /// Name of the synchronized collection, used in logs and metrics
    fn resource(&self) -> &str;
}
