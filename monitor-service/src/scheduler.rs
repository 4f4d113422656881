use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::source::BalanceSource;

/// Result of one acquisition pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireOutcome {
    pub kwh: f64,
    pub inserted: bool,
}

/// Fetch the balance once and write it through, deduplicating on the
/// (instant, account) key. Shared by the scheduler loop and the manual
/// refresh endpoint.
pub async fn acquire_once(
    pool: &SqlitePool,
    source: &dyn BalanceSource,
    account_id: &str,
    now: OffsetDateTime,
) -> Result<AcquireOutcome> {
    let kwh = match source.fetch_kwh().await {
        Ok(kwh) => {
            metrics::counter!("acquisition_success_total").increment(1);
            kwh
        }
        Err(e) => {
            metrics::counter!("acquisition_failures_total").increment(1);
            return Err(e.into());
        }
    };

    let inserted = balance_client::db::insert_reading_if_absent(pool, account_id, now, kwh).await?;

    if inserted {
        metrics::counter!("readings_inserted_total").increment(1);
        tracing::info!(account = account_id, kwh, "stored new balance reading");
    } else {
        metrics::counter!("readings_duplicate_total").increment(1);
        tracing::debug!(account = account_id, kwh, "reading for this instant already stored");
    }

    Ok(AcquireOutcome { kwh, inserted })
}

/// Samples the portal on a fixed interval and writes readings through.
pub struct AcquisitionScheduler {
    pool: SqlitePool,
    source: Arc<dyn BalanceSource>,
    account_id: String,
    interval: Duration,
    run_on_startup: bool,
}

impl AcquisitionScheduler {
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn BalanceSource>,
        account_id: String,
        interval: Duration,
        run_on_startup: bool,
    ) -> Self {
        Self {
            pool,
            source,
            account_id,
            interval,
            run_on_startup,
        }
    }

    /// Spawn the sampling loop. A failed tick is logged and the loop keeps
    /// going; the token stops it.
    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let first_tick = if self.run_on_startup {
                Duration::ZERO
            } else {
                self.interval
            };
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + first_tick, self.interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("acquisition scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = OffsetDateTime::now_utc();
                        if let Err(e) =
                            acquire_once(&self.pool, self.source.as_ref(), &self.account_id, now).await
                        {
                            tracing::warn!(error = %e, "acquisition failed, next attempt on schedule");
                        }
                    }
                }
            }
        })
    }
}
