use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use monitor_service::{
    api::{self, AppState},
    config::AppConfig,
    metrics_server, observability,
    scheduler::AcquisitionScheduler,
    source::{BalanceSource, PortalSource},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.store.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&cfg.store.path)
                .create_if_missing(true),
        )
        .await?;
    balance_client::db::init_schema(&pool).await?;

    let source: Arc<dyn BalanceSource> = Arc::new(PortalSource::new(&cfg.source, &cfg.account.id)?);

    let cancel = CancellationToken::new();
    AcquisitionScheduler::new(
        pool.clone(),
        source.clone(),
        cfg.account.id.clone(),
        Duration::from_secs(cfg.scheduler.interval_secs),
        cfg.scheduler.run_on_startup,
    )
    .start(cancel.clone());

    let state = AppState {
        pool,
        source,
        account: cfg.account.clone(),
        analytics: cfg.analytics.engine_config()?,
        lookback_days: cfg.analytics.lookback_days,
    };

    let addr: SocketAddr = cfg
        .http
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %addr,
        account = %cfg.account.id,
        interval_secs = cfg.scheduler.interval_secs,
        "monitor service listening"
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for shutdown signal");
    }
    cancel.cancel();
}
