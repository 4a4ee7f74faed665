//! Filegate -- session-authenticated file storage gateway.
//!
//! Crash-only design: every startup is a recovery. SIGTERM/SIGINT handlers
//! only stop accepting connections and wait with a timeout before exiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use filegate::config::Config;
use filegate::metadata::store::MetadataStore;
use filegate::storage::backend::BlobStore;

/// Command-line arguments for the Filegate server.
#[derive(Parser, Debug)]
#[command(
    name = "filegate",
    version,
    about = "Session-authenticated file storage gateway"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "filegate.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_metadata(config: &Config) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.metadata.engine.as_str() {
        "memory" => {
            warn!("In-memory metadata store: nothing survives a restart");
            Ok(Arc::new(filegate::metadata::memory::MemoryMetadataStore::new()))
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = filegate::metadata::sqlite::SqliteMetadataStore::new(path)?;
            info!("SQLite metadata store initialized at {}", path);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown metadata.engine '{other}' (expected sqlite or memory)"),
    }
}

async fn open_blob_store(config: &Config) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.storage.backend.as_str() {
        "s3" => {
            let s3_config = config.storage.s3.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 's3' but storage.s3 config section is missing")
            })?;
            let store = filegate::storage::s3::S3BlobStore::new(s3_config).await?;
            Ok(Arc::new(store))
        }
        "memory" => {
            warn!("In-memory blob store: nothing survives a restart");
            Ok(Arc::new(filegate::storage::memory::MemoryBlobStore::new()))
        }
        "local" => {
            let root = &config.storage.local.root_dir;
            let store = filegate::storage::local::LocalBlobStore::new(root)?;
            info!("Local blob store initialized at {}", root);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected local, memory or s3)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = filegate::config::load_config(&cli.config)?;
    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        filegate::metrics::init_metrics()?;
        filegate::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let metadata = open_metadata(&config).await?;
    let blobs = open_blob_store(&config).await?;
    let geo = filegate::auth::geo::from_config(&config.auth.geolocation)?;

    if config.server.dev_mode {
        warn!("Development routes enabled (user/session dumps, table reset)");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(filegate::AppState::new(config, metadata, blobs, geo));
    let app = filegate::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Filegate listening on {}", bind_addr);

    // The signal stops accepting connections; in-flight requests then get
    // `shutdown_timeout` to drain before the process exits anyway.
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signalled_tx.send(());
    });
    let mut serve = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut serve => joined??,
        _ = async {
            if signalled_rx.await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!("Shutdown timeout elapsed with requests still in flight");
        }
    }

    info!("Filegate shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
