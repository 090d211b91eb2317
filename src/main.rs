use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundforfound::backend::SupabaseClient;
use fundforfound::config::Config;
use fundforfound::relay::Web3FormsRelay;
use fundforfound::startup::run_startup_checks;
use fundforfound::AppState;

#[derive(Parser, Debug)]
#[command(name = "fundforfound")]
#[command(author, version, about = "Server for the Fund For Found crowdfunding platform", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "fundforfound.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Start even when a critical startup check fails
    #[arg(long, env = "FFF_SKIP_CHECKS")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fund For Found v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(SupabaseClient::new(&config.backend)?);
    let relay = Arc::new(Web3FormsRelay::new(&config.contact));

    let report = run_startup_checks(&config, Some(backend.as_ref())).await;
    if !report.all_critical_passed {
        if cli.skip_checks {
            tracing::warn!(summary = %report.summary, "Critical startup checks failed, continuing");
        } else {
            anyhow::bail!("Startup checks failed: {}", report.summary);
        }
    }

    let state = Arc::new(AppState::new(config.clone(), backend, relay));

    // Background maintenance
    fundforfound::session::spawn_prune_task(
        state.sessions.clone(),
        config.auth.session_prune_interval,
    );
    fundforfound::expenses::spawn_discard_task(state.ledgers.clone(), state.sessions.subscribe());
    fundforfound::notifications::spawn_prune_task(
        state.toasts.clone(),
        config.notifications.cleanup_interval,
    );
    fundforfound::brands::spawn_prune_task(
        state.pages.clone(),
        config.pages.cache_ttl_secs,
    );
    if config.rate_limit.enabled {
        fundforfound::api::rate_limit::spawn_cleanup_task(
            state.rate_limiter.clone(),
            config.rate_limit.cleanup_interval,
        );
    }

    let app = fundforfound::api::create_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Public URL: {}", config.server.public_url);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
