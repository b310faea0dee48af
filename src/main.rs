use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pr_dashboard::config::Config;
use pr_dashboard::ingest::Ingestor;
use pr_dashboard::notify::ChangeNotifier;
use pr_dashboard::projector::Projector;
use pr_dashboard::server::{AppState, build_router};
use pr_dashboard::store::{PrStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_dashboard=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("reading configuration")?;
    if config.webhook_secret.is_none() {
        warn!("No webhook secret configured; deliveries are accepted unsigned");
    }

    let store: Arc<dyn PrStore> = Arc::new(
        SqliteStore::open(&config.database)
            .with_context(|| format!("opening database {}", config.database.display()))?,
    );

    let projector = Projector::new(store.clone())
        .with_timeout(config.store_timeout)
        .with_policy(config.conflict_policy);
    let ingestor = Ingestor::new(projector, ChangeNotifier::new());

    let shutdown = CancellationToken::new();
    let app_state = AppState::new(ingestor, store)
        .with_webhook_secret(config.webhook_secret.clone())
        .with_query_timeout(config.store_timeout)
        .with_shutdown(shutdown.clone());
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        database = %config.database.display(),
        policy = ?config.conflict_policy,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("serving HTTP")?;

    info!("shut down");
    Ok(())
}

/// Resolves on Ctrl-C, cancelling `shutdown` so open event streams end and
/// the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
