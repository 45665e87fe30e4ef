//! tracekeep server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - TRACEKEEP_HOST: Bind address (default: 0.0.0.0)
//! - TRACEKEEP_PORT: Port number (default: 5050)
//! - TRACEKEEP_VALIDATION_MODE: strict | lenient | lenient-in-progress (default: lenient-in-progress)
//! - TRACEKEEP_UPDATE_MODE: replace | append (default: replace)
//! - TRACEKEEP_MAX_ATTRIBUTES: Per-map attribute limit; unset trusts client dropped counts
//! - TRACEKEEP_DEFAULT_TIMEOUT_MS / TRACEKEEP_MAX_TIMEOUT_MS: Request deadlines (default: 5000 / 30000)
//! - TRACEKEEP_EXPERIMENTS: Comma-separated known experiment ids; unset accepts any id
//! - TRACEKEEP_CATALOG_CACHE_TTL_SECS: Experiment lookup cache TTL (default: 60)
//! - TRACEKEEP_DATA_DIR: Enables snapshot persistence in this directory
//! - TRACEKEEP_SNAPSHOT_INTERVAL_SECS: Seconds between snapshots (default: 300)
//! - RUST_LOG: Log level (default: tracekeep=info,tower_http=info)

use tracekeep::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracekeep=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    tracing::info!("tracekeep configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Validation: {}", config.ingest.validation);
    tracing::info!("  Update mode: {}", config.ingest.update_mode);
    tracing::info!("  Dropped attributes: {:?}", config.ingest.dropped_attributes);
    tracing::info!(
        "  Timeouts: default {:?}, max {:?}",
        config.default_timeout,
        config.max_timeout
    );
    match &config.experiments {
        Some(ids) => tracing::info!("  Known experiments: {}", ids.join(", ")),
        None => tracing::info!("  Known experiments: any"),
    }
    match &config.persistence {
        Some(p) => tracing::info!(
            "  Snapshots: {} every {} seconds",
            p.data_dir.display(),
            p.snapshot_interval_secs
        ),
        None => tracing::info!("  Snapshots: disabled"),
    }

    println!(
        r#"
  _                       _
 | |_ _ __ __ _  ___ ___| | _____  ___ _ __
 | __| '__/ _` |/ __/ _ \ |/ / _ \/ _ \ '_ \
 | |_| | | (_| | (_|  __/   <  __/  __/ |_) |
  \__|_|  \__,_|\___\___|_|\_\___|\___| .__/
                                      |_|
 Trace ingestion for MLflow and OpenTelemetry
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
