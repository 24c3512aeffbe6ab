//! Informer CLI
//!
//! Mirrors one API server collection into memory and serves it over the admin API.

use clap::Parser;
use informer::admin_api::{run_admin_server, AdminState};
use informer::{ApiClient, Informer};
use informer_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "informer")]
#[command(about = "List-watch cache synchronizer for Kubernetes-style APIs")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "INFORMER_CONFIG")]
    config: Option<String>,

    /// API server URL
    #[arg(long, env = "INFORMER_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the API server
    #[arg(long, env = "INFORMER_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Collection path, e.g. /api/v1/pods
    #[arg(long, env = "INFORMER_API_PATH")]
    api_path: Option<String>,

    /// Resource kind used in logs and metrics
    #[arg(long, env = "INFORMER_KIND")]
    kind: Option<String>,

    /// Maximum lifetime of one watch, in seconds
    #[arg(long, env = "INFORMER_RECONCILE_TIMEOUT_SECS")]
    reconcile_timeout_secs: Option<u64>,

    /// Items per list page
    #[arg(long, env = "INFORMER_PAGE_LIMIT")]
    page_limit: Option<u32>,

    /// Dotted field paths removed before caching (comma-separated)
    #[arg(long, env = "INFORMER_STRIP_FIELDS", value_delimiter = ',')]
    strip_fields: Vec<String>,

    /// Admin API listen address
    #[arg(long, env = "INFORMER_ADMIN_LISTEN")]
    admin_listen: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json or pretty)
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,
}

impl Args {
    fn apply(self, mut config: InformerConfig) -> Result<InformerConfig> {
        if let Some(url) = self.api_url {
            config.api.url = url;
        }
        if self.bearer_token.is_some() {
            config.api.bearer_token = self.bearer_token;
        }
        if let Some(path) = self.api_path {
            config.resource.api_path = path;
        }
        if let Some(kind) = self.kind {
            config.resource.kind = kind;
        }
        if let Some(secs) = self.reconcile_timeout_secs {
            config.sync.reconcile_timeout = Duration::from_secs(secs);
        }
        if self.page_limit.is_some() {
            config.sync.page_limit = self.page_limit;
        }
        if !self.strip_fields.is_empty() {
            config.projection.strip_fields = self.strip_fields;
        }
        if let Some(listen) = self.admin_listen {
            config.admin.listen = listen;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = InformerConfig::load(args.config.as_deref())?;
    let config = args.apply(config)?;

    // Initialize tracing
    let json = config.observability.log_format != "pretty";
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().pretty()))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        kind = %config.resource.kind,
        api_path = %config.resource.api_path,
        "Starting informer"
    );

    let client = ApiClient::new(&config.api, &config.resource)?;
    if let Err(e) = client.health_check().await {
        warn!(error = %e, url = %config.api.url, "API server health check failed, continuing");
    }

    let informer = Arc::new(Informer::new(client, config.clone()));

    let mut events = informer.subscribe();
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(
                kind = %event.kind,
                uid = ?event.uid().map(|uid| uid.to_string()),
                "Event received"
            );
        }
    });

    informer.start().await?;
    info!("Informer running");

    let shutdown = CancellationToken::new();
    let admin = config.admin.enabled.then(|| {
        let state = AdminState {
            stats: {
                let informer = Arc::clone(&informer);
                Arc::new(move || informer.stats())
            },
            objects: {
                let informer = Arc::clone(&informer);
                Arc::new(move || informer.list())
            },
            ready: {
                let informer = Arc::clone(&informer);
                Arc::new(move || informer.has_synced())
            },
        };
        tokio::spawn(run_admin_server(config.admin.listen.clone(), state, shutdown.clone()))
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    informer.stop().await?;
    shutdown.cancel();

    if let Some(admin) = admin {
        match admin.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Admin API failed"),
            Err(e) => error!(error = %e, "Admin API task panicked"),
        }
    }
    if let Err(e) = event_log.await {
        error!(error = %e, "Event log task failed");
    }

    let stats = informer.stats();
    info!(
        cached = stats.cached_objects,
        events = stats.events_processed,
        list_passes = stats.list_passes_ok,
        "Informer stopped gracefully"
    );
    Ok(())
}
