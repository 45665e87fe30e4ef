use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_trace, delete_trace_tag, get_trace, health_check, set_trace_tag, AppState,
};
use crate::ingest::{
    AllowAll, AnyExperiment, DroppedAttributesPolicy, ExperimentCatalog, IngestConfig,
    LocationResolver, RandomIdGenerator, StaticExperimentCatalog, TraceService, UpdateMode,
};
use crate::storage::{InMemoryTraceStore, PersistenceConfig, SnapshotManager, SnapshotWorker};
use crate::validate::ValidationPolicy;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ingest: IngestConfig,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    /// Known experiment ids; `None` accepts any id
    pub experiments: Option<Vec<String>>,
    pub catalog_cache_ttl: Duration,
    /// Snapshot persistence, off unless a data directory is configured
    pub persistence: Option<PersistenceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
            ingest: IngestConfig::default(),
            default_timeout: Duration::from_millis(5000),
            max_timeout: Duration::from_millis(30_000),
            experiments: None,
            catalog_cache_ttl: Duration::from_secs(60),
            persistence: None,
        }
    }
}

impl ServerConfig {
    /// Read `TRACEKEEP_*` variables from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unparseable values keep their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("TRACEKEEP_HOST").unwrap_or(defaults.host);
        let port = parsed(&var, "TRACEKEEP_PORT").unwrap_or(defaults.port);

        let validation = parsed::<ValidationPolicy>(&var, "TRACEKEEP_VALIDATION_MODE")
            .unwrap_or_default();
        let update_mode = parsed::<UpdateMode>(&var, "TRACEKEEP_UPDATE_MODE").unwrap_or_default();
        let dropped_attributes = parsed::<usize>(&var, "TRACEKEEP_MAX_ATTRIBUTES")
            .map(|max_attributes| DroppedAttributesPolicy::Enforce { max_attributes })
            .unwrap_or_default();

        let default_timeout = parsed(&var, "TRACEKEEP_DEFAULT_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.default_timeout);
        let max_timeout = parsed(&var, "TRACEKEEP_MAX_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_timeout);

        let experiments = var("TRACEKEEP_EXPERIMENTS").map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        });
        let catalog_cache_ttl = parsed(&var, "TRACEKEEP_CATALOG_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.catalog_cache_ttl);

        let persistence = var("TRACEKEEP_DATA_DIR").map(|dir| {
            let config = PersistenceConfig::new(PathBuf::from(dir));
            match parsed(&var, "TRACEKEEP_SNAPSHOT_INTERVAL_SECS") {
                Some(secs) => config.with_snapshot_interval(secs),
                None => config,
            }
        });

        Self {
            host,
            port,
            ingest: IngestConfig {
                validation,
                update_mode,
                dropped_attributes,
            },
            default_timeout,
            max_timeout,
            experiments,
            catalog_cache_ttl,
            persistence,
        }
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}; using the default", name, raw, e);
            None
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tracing/traces", post(create_trace))
        .route("/tracing/traces/:trace_id", get(get_trace))
        .route("/tracing/traces/:trace_id/tags", patch(set_trace_tag))
        .route("/tracing/traces/:trace_id/tags/:key", delete(delete_trace_tag))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Wire the service together from configuration
pub fn build_service(config: &ServerConfig, store: Arc<InMemoryTraceStore>) -> TraceService {
    let catalog: Arc<dyn ExperimentCatalog> = match &config.experiments {
        Some(ids) => Arc::new(StaticExperimentCatalog::new(ids.iter().cloned())),
        None => Arc::new(AnyExperiment),
    };
    let resolver = LocationResolver::new(catalog, Arc::new(AllowAll), config.catalog_cache_ttl);
    TraceService::new(store, Arc::new(RandomIdGenerator::new()), resolver, config.ingest)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryTraceStore::new());

    // Restore the last snapshot before accepting writes
    let snapshots = match &config.persistence {
        Some(persistence) => {
            let manager = Arc::new(SnapshotManager::new(persistence)?);
            if let Some(restored) = manager.restore_latest(&store)? {
                tracing::info!(
                    snapshot_id = %restored.id,
                    traces = restored.trace_count,
                    "Restored snapshot"
                );
            }
            let worker = Arc::new(SnapshotWorker::new(
                Arc::clone(&store),
                manager,
                Duration::from_secs(persistence.snapshot_interval_secs),
            ));
            let handle = Arc::clone(&worker).start();
            Some((worker, handle))
        }
        None => {
            tracing::info!("Snapshot persistence disabled");
            None
        }
    };

    let state = Arc::new(AppState {
        service: Arc::new(build_service(&config, Arc::clone(&store))),
        default_timeout: config.default_timeout,
        max_timeout: config.max_timeout,
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting tracekeep server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Final snapshot on shutdown
    if let Some((worker, handle)) = snapshots {
        worker.stop();
        handle.abort();
        worker.snapshot_now().await;
    }

    tracing::info!("tracekeep server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
