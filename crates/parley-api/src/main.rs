//! parley-api - HTTP API server for parley conversations

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_api::{build_router, AppState, ServerConfig, StoreKind};
use parley_core::{ConversationRepository, EventBus, IdentityResolver};
use parley_db::{Database, MemoryConversationRepository, PoolConfig, StaticIdentityResolver};

const POOL_METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _file_guard = init_tracing();

    let config = ServerConfig::from_env()?;
    let shutdown = CancellationToken::new();

    info!(
        "Rate limiting: {} ({} requests per {} seconds)",
        if config.rate_limit.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.rate_limit.requests,
        config.rate_limit.period.as_secs()
    );

    let (conversations, identity): (Arc<dyn ConversationRepository>, Arc<dyn IdentityResolver>) =
        match config.store {
            StoreKind::Postgres => {
                info!("Connecting to database...");
                let pool_config = PoolConfig::new().max_connections(config.db_max_connections);
                let db = Database::connect_with_config(&config.database_url, pool_config).await?;
                info!("Database connected");

                info!("Running database migrations...");
                db.migrate().await?;
                info!("Database migrations complete");

                spawn_pool_metrics(db.clone(), shutdown.clone());
                let conversations: Arc<dyn ConversationRepository> = Arc::new(db.conversations);
                let identity: Arc<dyn IdentityResolver> = Arc::new(db.sessions);
                (conversations, identity)
            }
            StoreKind::Memory => {
                warn!("Using in-memory store; data is lost on restart");
                let conversations: Arc<dyn ConversationRepository> =
                    Arc::new(MemoryConversationRepository::new());
                let identity: Arc<dyn IdentityResolver> =
                    Arc::new(StaticIdentityResolver::parse(&config.static_tokens)?);
                (conversations, identity)
            }
        };

    let state = AppState::new(conversations, identity, Arc::new(EventBus::new()))
        .with_stream_config(config.stream.clone())
        .with_shutdown(shutdown.clone())
        .with_rate_limit(&config.rate_limit);

    info!(
        keepalive_secs = config.stream.keepalive_interval.as_secs(),
        buffer = config.stream.buffer,
        "Event stream configured"
    );

    let app = build_router(state, config.allowed_origins.clone());

    // Start server
    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "parley_api=debug,tower_http=debug")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parley_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("parley-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

fn spawn_pool_metrics(db: Database, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POOL_METRICS_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => parley_db::log_pool_metrics(db.pool()),
            }
        }
    });
}

/// Resolve on Ctrl-C or SIGTERM. Cancels the root token first so open
/// event streams end and the graceful shutdown can complete.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, closing event streams");
    shutdown.cancel();
}
