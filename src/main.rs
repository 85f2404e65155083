use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskboard::config::LogFormat;
use taskboard::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info", LogFormat::Pretty);
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    init_tracing(&config.log_level, config.log_format);

    info!("Starting Taskboard v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// `RUST_LOG` wins over `LOG_LEVEL` when set.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        database = %config.database_url,
        audit_backend = %config.audit_backend,
        cache_backend = %config.cache_backend,
        "Configuration loaded"
    );

    if !config.proxy_validation_enabled() {
        warn!("TRUSTED_PROXIES is empty; forwarded client IP headers are trusted from any peer");
    }

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let state = AppState::from_config(config.clone()).await.map_err(|e| {
        error!("Failed to initialize application state: {e}");
        exitcode::UNAVAILABLE
    })?;

    let app = build_router(state.clone());

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /health                  - Health check");
    info!("  GET    /ready                   - Readiness check");
    info!("  GET    /stats                   - Task statistics");
    info!("  GET    /api/tasks               - List tasks");
    info!("  POST   /api/tasks               - Create task");
    info!("  GET    /api/tasks/{{id}}          - Show task");
    info!("  PUT    /api/tasks/{{id}}          - Update task");
    info!("  DELETE /api/tasks/{{id}}          - Move task to trash");
    info!("  POST   /api/tasks/{{id}}/restore  - Restore task");
    info!("  DELETE /api/tasks/{{id}}/force    - Delete task permanently");
    info!("  GET    /api/tasks/{{id}}/logs     - Task audit trail");
    info!("  GET    /api/logs                - Recent audit logs");

    // Peer addresses feed client IP resolution
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
