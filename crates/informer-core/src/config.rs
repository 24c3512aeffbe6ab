//! Configuration types for the informer
//!
//! Uses the `config` crate for layered configuration from files and environment.

use crate::error::{InformerError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InformerConfig {
    /// Remote API server connection
    #[serde(default)]
    pub api: ApiServerConfig,

    /// Which collection to synchronize
    #[serde(default)]
    pub resource: ResourceConfig,

    /// List/watch cycle tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Subscriber fan-out
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Object shaping before caching
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminApiConfig,
}

// ============================================================================
// API Server Configuration
// ============================================================================

/// API server connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    /// Base URL of the API server
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Optional bearer token for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Timeout for list requests (watch requests are long-lived and never time out)
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_api_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            bearer_token: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Synchronized collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource kind name used in logs and metrics (e.g. "pods")
    #[serde(default = "default_resource_kind")]
    pub kind: String,

    /// Collection path on the API server (e.g. "/api/v1/pods")
    #[serde(default = "default_api_path")]
    pub api_path: String,
}

fn default_resource_kind() -> String {
    "pods".to_string()
}

fn default_api_path() -> String {
    "/api/v1/pods".to_string()
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            kind: default_resource_kind(),
            api_path: default_api_path(),
        }
    }
}

// ============================================================================
// Sync Configuration
// ============================================================================

/// List/watch cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum lifetime of one watch before a forced full resync
    #[serde(with = "humantime_serde", default = "default_reconcile_timeout")]
    pub reconcile_timeout: Duration,

    /// Maximum items per list page (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_limit: Option<u32>,

    /// Pause between cycles
    #[serde(with = "humantime_serde", default = "default_cooldown")]
    pub cooldown: Duration,

    /// How long `stop()` waits for the background task before aborting it
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    /// Evict cached objects missing from a complete listing
    #[serde(default)]
    pub prune_on_resync: bool,
}

fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: default_reconcile_timeout(),
            page_limit: None,
            cooldown: default_cooldown(),
            shutdown_timeout: default_shutdown_timeout(),
            prune_on_resync: false,
        }
    }
}

// ============================================================================
// Broadcast Configuration
// ============================================================================

/// What happens when a subscriber's buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Close the lagging subscription so the consumer can re-list
    #[default]
    Disconnect,
    /// Drop the event for that subscriber only
    DropNewest,
}

/// Subscriber fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Per-subscriber buffer (0 = unbounded)
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Policy applied when a bounded buffer is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_subscriber_buffer() -> usize {
    1024
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Projection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Dotted field paths removed before caching (e.g. "metadata.managedFields")
    #[serde(default)]
    pub strip_fields: Vec<String>,
}

// ============================================================================
// Observability / Admin
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminApiConfig {
    /// Enable admin API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

fn default_true() -> bool {
    true
}

fn default_admin_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AdminApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_admin_listen(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl InformerConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix INFORMER_
        builder = builder.add_source(
            config::Environment::with_prefix("INFORMER")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the sync loop cannot run with
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.url)
            .map_err(|e| InformerError::config(format!("invalid api.url {:?}: {}", self.api.url, e)))?;

        if !self.resource.api_path.starts_with('/') {
            return Err(InformerError::config(format!(
                "resource.api_path must start with '/', got {:?}",
                self.resource.api_path
            )));
        }
        if self.resource.kind.is_empty() {
            return Err(InformerError::config("resource.kind must not be empty"));
        }
        if self.sync.reconcile_timeout.is_zero() {
            return Err(InformerError::config("sync.reconcile_timeout must be positive"));
        }
        if self.sync.page_limit == Some(0) {
            return Err(InformerError::config("sync.page_limit must be positive when set"));
        }
        Ok(())
    }
}
