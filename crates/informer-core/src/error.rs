//! Error types for the informer
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.
//! None of these errors ever reach consumers of `list()` or `subscribe()`; the
//! sync loop logs them and retries the cycle.

use std::fmt;
use thiserror::Error;

/// Result type alias for informer operations
pub type Result<T> = std::result::Result<T, InformerError>;

/// Primary error type for all informer operations
#[derive(Error, Debug)]
pub enum InformerError {
    /// Network, HTTP status or connection errors talking to the remote source
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bulk fetch returned no response or no items
    #[error("Empty response: {message}")]
    EmptyResponse { message: String },

    /// List body or watch frame could not be decoded
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Invalid lifecycle transition (e.g. starting twice)
    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },

    /// Cancellation observed while an operation was in flight
    #[error("Shutdown requested")]
    Shutdown,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InformerError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an empty-response error
    pub fn empty_response(message: impl Into<String>) -> Self {
        Self::EmptyResponse {
            message: message.into(),
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// Check if the next sync cycle may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::EmptyResponse { .. } | Self::Serialization { .. }
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::EmptyResponse { .. } => "empty_response",
            Self::Serialization { .. } => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::Lifecycle { .. } => "lifecycle",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for InformerError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_with_source("JSON decoding failed", e)
    }
}

impl From<config::ConfigError> for InformerError {
    fn from(e: config::ConfigError) -> Self {
        Self::config(e.to_string())
    }
}

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: String,
    pub resource: Option<String>,
    pub resume_token: Option<String>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            resource: None,
            resume_token: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_resume_token(mut self, token: Option<impl Into<String>>) -> Self {
        self.resume_token = token.map(Into::into);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}]", self.component, self.operation)?;
        if let Some(ref resource) = self.resource {
            write!(f, " resource={}", resource)?;
        }
        if let Some(ref token) = self.resume_token {
            write!(f, " resume_token={}", token)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContextExt<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T>;
}

impl<T> ErrorContextExt<T> for Result<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            if matches!(e, InformerError::Shutdown) {
                tracing::debug!(context = %ctx, "Operation interrupted by shutdown");
            } else if e.is_retryable() {
                tracing::warn!(
                    error = %e,
                    component = ctx.component,
                    operation = %ctx.operation,
                    resource = ?ctx.resource,
                    resume_token = ?ctx.resume_token,
                    "Operation failed, retrying next cycle"
                );
            } else {
                tracing::error!(
                    error = %e,
                    component = ctx.component,
                    operation = %ctx.operation,
                    resource = ?ctx.resource,
                    resume_token = ?ctx.resume_token,
                    "Operation failed"
                );
            }
            e
        })
    }
}
