use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use balance_client::analytics::{self, AnalyticsConfig, AnalyticsSnapshot};
use balance_client::db;

use crate::config::AccountConfig;
use crate::scheduler;
use crate::source::{AcquireError, BalanceSource};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub source: Arc<dyn BalanceSource>,
    pub account: AccountConfig,
    pub analytics: AnalyticsConfig,
    pub lookback_days: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/config", get(get_config))
        .route("/api/data", get(get_data))
        .route("/api/analytics", get(get_analytics))
        .route("/api/refresh", post(post_refresh))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

#[derive(Debug, Serialize)]
struct ConfigBody {
    account_id: String,
    display_name: String,
    version: &'static str,
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigBody> {
    Json(ConfigBody {
        account_id: state.account.id.clone(),
        display_name: state.account.display_name(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct ReadingBody {
    timestamp: String,
    account_id: String,
    kwh: f64,
}

async fn get_data(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReadingBody>>, (StatusCode, String)> {
    let now = OffsetDateTime::now_utc();
    let since = now - Duration::days(state.lookback_days);
    let readings = db::readings_since(&state.pool, Some(&state.account.id), since)
        .await
        .map_err(internal_error)?;

    let body = readings
        .into_iter()
        .map(|r| ReadingBody {
            timestamp: rfc3339(r.ts),
            account_id: r.account_id,
            kwh: r.kwh,
        })
        .collect();
    Ok(Json(body))
}

#[derive(Debug, Serialize)]
struct DailyBody {
    date: String,
    kwh: f64,
}

#[derive(Debug, Serialize)]
struct RechargeBody {
    time: String,
    amount_kwh: f64,
    days_since: i64,
}

#[derive(Debug, Serialize)]
struct AnalyticsBody {
    current_kwh: Option<f64>,
    consumed_3h_kwh: Option<f64>,
    consumed_24h_kwh: Option<f64>,
    consumed_7d_kwh: Option<f64>,
    max_daily: Option<DailyBody>,
    min_daily: Option<DailyBody>,
    last_recharge: Option<RechargeBody>,
    days_remaining: Option<f64>,
}

impl From<AnalyticsSnapshot> for AnalyticsBody {
    fn from(snap: AnalyticsSnapshot) -> Self {
        Self {
            current_kwh: snap.current_kwh,
            consumed_3h_kwh: snap.consumed_3h_kwh,
            consumed_24h_kwh: snap.consumed_24h_kwh,
            consumed_7d_kwh: snap.consumed_7d_kwh,
            max_daily: snap.max_daily.map(|d| DailyBody {
                date: d.date.to_string(),
                kwh: d.kwh,
            }),
            min_daily: snap.min_daily.map(|d| DailyBody {
                date: d.date.to_string(),
                kwh: d.kwh,
            }),
            last_recharge: snap.last_recharge.map(|r| RechargeBody {
                time: rfc3339(r.ts),
                amount_kwh: r.amount_kwh,
                days_since: r.days_since,
            }),
            days_remaining: snap.days_remaining,
        }
    }
}

async fn get_analytics(
    State(state): State<AppState>,
) -> Result<Json<AnalyticsBody>, (StatusCode, String)> {
    metrics::counter!("analytics_requests_total").increment(1);

    let now = OffsetDateTime::now_utc();
    let snap = analytics::compute_for_account(
        &state.pool,
        &state.account.id,
        now,
        state.lookback_days,
        &state.analytics,
    )
    .await
    .map_err(internal_error)?;

    Ok(Json(snap.into()))
}

#[derive(Debug, Serialize)]
struct RefreshBody {
    kwh: f64,
    inserted: bool,
}

async fn post_refresh(
    State(state): State<AppState>,
) -> Result<Json<RefreshBody>, (StatusCode, String)> {
    let now = OffsetDateTime::now_utc();
    match scheduler::acquire_once(&state.pool, state.source.as_ref(), &state.account.id, now).await
    {
        Ok(outcome) => Ok(Json(RefreshBody {
            kwh: outcome.kwh,
            inserted: outcome.inserted,
        })),
        Err(e) if e.downcast_ref::<AcquireError>().is_some() => {
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(e) => Err(internal_error(e)),
    }
}
