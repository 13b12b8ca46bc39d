//! BidRoom Server - Main entry point.
//!
//! This binary starts the BidRoom auction relay with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`bidroom_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Defaults: port 8080, 10 teams per room, 30 second timer
//! cargo run --bin bidroom-server
//!
//! # Production mode
//! PORT=3001 \
//! BIDROOM_ALLOWED_ORIGINS="https://auction.example.com" \
//! cargo run --release --bin bidroom-server
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use bidroom_server::config::Config;
use bidroom_server::error::ServerError;
use bidroom_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                       - HTTP server port (default: 8080)");
            eprintln!("  BIDROOM_BIND_ADDR          - Interface to bind (default: 0.0.0.0)");
            eprintln!("  BIDROOM_MAX_TEAMS          - Team slots per room, 1-64 (default: 10)");
            eprintln!("  BIDROOM_DEFAULT_TIMER      - Timer of a fresh room in seconds (default: 30)");
            eprintln!("  BIDROOM_NOTIFY_REJECTIONS  - Report refused operations (default: true)");
            eprintln!("  BIDROOM_ALLOWED_ORIGINS    - Comma-separated CORS origins (default: any)");
            eprintln!("  RUST_LOG                   - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Server error");
            ExitCode::from(1)
        }
    }
}

/// Binds the listener and serves until a shutdown signal arrives.
async fn run(config: Config) -> Result<(), ServerError> {
    info!(
        port = config.port,
        max_teams = config.max_teams,
        default_timer = config.default_timer,
        notify_rejections = config.notify_rejections,
        "BidRoom server starting"
    );
    if config.allowed_origins.is_empty() {
        warn!("BIDROOM_ALLOWED_ORIGINS not set - accepting requests from any origin");
    }

    let bind_addr = SocketAddr::new(config.bind_addr, config.port);
    let state = AppState::new(config);
    let app = create_router(state.clone());

    let listener = TcpListener::bind(bind_addr).await.map_err(|err| {
        error!(error = %err, address = %bind_addr, "Failed to bind to address");
        err
    })?;
    info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let relay = state.relay.lock().await;
    info!(
        open_connections = relay.connection_count(),
        active_rooms = relay.room_count(),
        "Server shutting down gracefully"
    );
    debug!(rooms = ?relay.room_ids(), "Discarding in-memory room state");
    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
