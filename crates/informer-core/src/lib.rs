//! # Informer Core
//!
//! Core types, source traits, configuration and metrics for the list-watch
//! informer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐ list pages ┌─────────────┐ snapshot ┌───────────┐
//! │ ListWatchSource│───────────►│ Cache Store │─────────►│ consumers │
//! │    Strategy    │───────────►└─────────────┘          └───────────┘
//! └────────────────┘  watch           ▲                        ▲
//!                     events          │ upsert/evict           │ subscribe
//!                          ┌──────────┴─────────┐    ┌─────────┴───────┐
//!                          │ Change Stream Proc │───►│ Event Broadcast │
//!                          └────────────────────┘    └─────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod projection;
pub mod strategy;

pub use self::config::*;
pub use self::error::*;
pub use self::message::*;
pub use self::metrics::*;
pub use self::projection::{FnProjection, IdentityProjection, Projection, StripFieldsProjection};
pub use self::strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::InformerConfig;
    pub use crate::error::{InformerError, Result};
    pub use crate::message::{EventKind, ListPage, PageCursor, RawObject, ResumeToken, StreamEvent, Uid};
    pub use crate::projection::Projection;
    pub use crate::strategy::{EventStream, HealthCheck, Lifecycle, ListWatchSource};
}
