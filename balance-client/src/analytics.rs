use std::collections::BTreeMap;

use anyhow::Result;
use sqlx::SqlitePool;
use time::macros::offset;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::db;
use crate::domain::Reading;
use crate::series;

/// Thresholds and the day-boundary zone for one analytics pass.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// An upward jump must strictly exceed this to count as a recharge;
    /// smaller jumps are meter jitter.
    pub recharge_threshold_kwh: f64,
    /// Daily consumption at or below this is noise, not usage.
    pub noise_floor_kwh: f64,
    /// Burn rate assumed when the series shows no measurable consumption.
    pub fallback_daily_kwh: f64,
    /// Fixed offset used to assign readings to calendar days.
    pub day_boundary_offset: UtcOffset,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            recharge_threshold_kwh: 1.0,
            noise_floor_kwh: 0.1,
            fallback_daily_kwh: 5.0,
            day_boundary_offset: offset!(+8),
        }
    }
}

/// Consumption total for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyConsumption {
    pub date: Date,
    pub kwh: f64,
}

/// The most recent upward balance jump, relative to the reference instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RechargeEvent {
    pub ts: OffsetDateTime,
    pub amount_kwh: f64,
    pub days_since: i64,
}

/// Everything derived from one account's series at one reference instant.
/// `None` always means "no qualifying data", never zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyticsSnapshot {
    pub current_kwh: Option<f64>,
    pub consumed_3h_kwh: Option<f64>,
    pub consumed_24h_kwh: Option<f64>,
    pub consumed_7d_kwh: Option<f64>,
    pub max_daily: Option<DailyConsumption>,
    pub min_daily: Option<DailyConsumption>,
    pub last_recharge: Option<RechargeEvent>,
    pub days_remaining: Option<f64>,
}

/// Total kWh consumed in `[start, end]`: the sum of decreases between
/// consecutive readings inside the window.
///
/// Increases are recharges, not negative consumption, and contribute
/// zero, so the total holds across any number of recharges inside the
/// window.
pub fn consumed_between(series: &[Reading], start: OffsetDateTime, end: OffsetDateTime) -> f64 {
    let mut total = 0.0;
    let mut prev: Option<f64> = None;
    for reading in series.iter().filter(|r| r.ts >= start && r.ts <= end) {
        if let Some(prev_kwh) = prev {
            let delta = prev_kwh - reading.kwh;
            if delta > 0.0 {
                total += delta;
            }
        }
        prev = Some(reading.kwh);
    }
    total
}

/// Consumption keyed by calendar day. Each consecutive-pair decrease is
/// charged to the day of the pair's earlier reading, so overnight pairs
/// count toward the day they started in.
fn consumption_by_day(series: &[Reading], offset: UtcOffset) -> BTreeMap<Date, f64> {
    let mut days: BTreeMap<Date, f64> = BTreeMap::new();
    for pair in series.windows(2) {
        let delta = pair[0].kwh - pair[1].kwh;
        if delta > 0.0 {
            let day = pair[0].ts.to_offset(offset).date();
            *days.entry(day).or_insert(0.0) += delta;
        }
    }
    days
}

/// Highest- and lowest-consumption days. A day qualifies only when its
/// consumption strictly exceeds the noise floor. Ties favor the earliest
/// day for the max and the latest day for the min.
pub fn daily_extrema(
    series: &[Reading],
    cfg: &AnalyticsConfig,
) -> (Option<DailyConsumption>, Option<DailyConsumption>) {
    let mut max: Option<DailyConsumption> = None;
    let mut min: Option<DailyConsumption> = None;

    for (date, kwh) in consumption_by_day(series, cfg.day_boundary_offset) {
        if kwh <= cfg.noise_floor_kwh {
            continue;
        }
        if max.map_or(true, |m| kwh > m.kwh) {
            max = Some(DailyConsumption { date, kwh });
        }
        if min.map_or(true, |m| kwh <= m.kwh) {
            min = Some(DailyConsumption { date, kwh });
        }
    }

    (max, min)
}

/// The most recent pair where the balance jumped up by strictly more than
/// the threshold, scanning backward. A jump of exactly the threshold does
/// not qualify. Returns the jump's timestamp and magnitude.
pub fn last_recharge(series: &[Reading], threshold_kwh: f64) -> Option<(OffsetDateTime, f64)> {
    for pair in series.windows(2).rev() {
        let (prev, curr) = (&pair[0], &pair[1]);
        if curr.kwh > prev.kwh + threshold_kwh {
            return Some((curr.ts, curr.kwh - prev.kwh));
        }
    }
    None
}

/// Derive every metric from a normalized series at the given instant. An
/// empty series yields a snapshot with every field absent.
pub fn snapshot(
    series: &[Reading],
    now: OffsetDateTime,
    cfg: &AnalyticsConfig,
) -> AnalyticsSnapshot {
    let current_kwh = match series.last() {
        Some(latest) => latest.kwh,
        None => return AnalyticsSnapshot::default(),
    };

    let consumed_3h = consumed_between(series, now - Duration::hours(3), now);
    let consumed_24h = consumed_between(series, now - Duration::days(1), now);
    let consumed_7d = consumed_between(series, now - Duration::days(7), now);

    let (max_daily, min_daily) = daily_extrema(series, cfg);

    let recharge = last_recharge(series, cfg.recharge_threshold_kwh).map(|(ts, amount_kwh)| {
        RechargeEvent {
            ts,
            amount_kwh,
            days_since: (now - ts).whole_days(),
        }
    });

    // Burn rate prefers yesterday's usage when it clears the noise floor,
    // then the weekly average, then the configured fallback.
    let burn_rate = if consumed_24h > cfg.noise_floor_kwh {
        consumed_24h
    } else if consumed_7d > 0.0 {
        consumed_7d / 7.0
    } else {
        cfg.fallback_daily_kwh
    };
    let days_remaining = if burn_rate > 0.0 {
        Some(current_kwh / burn_rate)
    } else {
        None
    };

    AnalyticsSnapshot {
        current_kwh: Some(current_kwh),
        consumed_3h_kwh: Some(consumed_3h),
        consumed_24h_kwh: Some(consumed_24h),
        consumed_7d_kwh: Some(consumed_7d),
        max_daily,
        min_daily,
        last_recharge: recharge,
        days_remaining,
    }
}

/// Load one account's readings over the lookback window, normalize them,
/// and derive the full snapshot.
pub async fn compute_for_account(
    pool: &SqlitePool,
    account_id: &str,
    now: OffsetDateTime,
    lookback_days: i64,
    cfg: &AnalyticsConfig,
) -> Result<AnalyticsSnapshot> {
    let since = now - Duration::days(lookback_days);
    let raw = db::readings_since(pool, Some(account_id), since).await?;
    let series = series::normalize(raw);
    Ok(snapshot(&series, now, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use time::macros::{date, datetime};

    fn reading(ts: OffsetDateTime, kwh: f64) -> Reading {
        Reading {
            ts,
            account_id: "507".to_string(),
            kwh,
        }
    }

    fn utc_cfg() -> AnalyticsConfig {
        AnalyticsConfig {
            day_boundary_offset: offset!(UTC),
            ..AnalyticsConfig::default()
        }
    }

    #[test]
    fn consumption_sums_only_decreases() {
        let t0 = datetime!(2024-03-01 00:00:00 UTC);
        let series = vec![
            reading(t0, 10.0),
            reading(t0 + Duration::hours(1), 9.0),
            reading(t0 + Duration::hours(2), 9.0),
            reading(t0 + Duration::hours(3), 8.5),
        ];

        let total = consumed_between(&series, t0, t0 + Duration::hours(3));
        assert!((total - 1.5).abs() < 1e-9);
    }

    #[test]
    fn recharge_jump_contributes_no_consumption() {
        let t0 = datetime!(2024-03-10 00:00:00 UTC);
        let series = vec![
            reading(t0, 10.0),
            reading(t0 + Duration::hours(1), 5.0),
            reading(t0 + Duration::hours(2), 105.0),
        ];

        let total = consumed_between(&series, t0, t0 + Duration::hours(2));
        assert!((total - 5.0).abs() < 1e-9);

        let (ts, amount) = last_recharge(&series, 1.0).expect("recharge expected");
        assert_eq!(ts, t0 + Duration::hours(2));
        assert!((amount - 100.0).abs() < 1e-9);
    }

    #[test]
    fn consumption_spans_recharges_without_undercounting() {
        let t0 = datetime!(2024-03-10 00:00:00 UTC);
        let series = vec![
            reading(t0, 100.0),
            reading(t0 + Duration::hours(1), 95.0),
            reading(t0 + Duration::hours(2), 90.0),
            reading(t0 + Duration::hours(3), 190.0),
            reading(t0 + Duration::hours(4), 185.0),
            reading(t0 + Duration::hours(5), 180.0),
        ];

        // First - last would claim -80; the real usage is 10 + 10.
        let total = consumed_between(&series, t0, t0 + Duration::hours(5));
        assert!((total - 20.0).abs() < 1e-9);
    }

    #[test]
    fn readings_outside_the_window_do_not_count() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let series = vec![
            reading(now - Duration::hours(10), 60.0),
            reading(now - Duration::hours(2), 59.0),
            reading(now - Duration::hours(1), 58.0),
            reading(now + Duration::hours(1), 20.0),
        ];

        let total = consumed_between(&series, now - Duration::hours(3), now);
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn daily_cadence_consumption_and_extrema() {
        let t0 = datetime!(2024-03-01 08:00:00 UTC);
        let series = vec![
            reading(t0, 100.0),
            reading(t0 + Duration::days(1), 90.0),
            reading(t0 + Duration::days(2), 80.0),
        ];
        let now = t0 + Duration::days(2);

        let total = consumed_between(&series, now - Duration::days(7), now);
        assert!((total - 20.0).abs() < 1e-9);

        let (max, min) = daily_extrema(&series, &AnalyticsConfig::default());
        let max = max.expect("max expected");
        let min = min.expect("min expected");
        assert!((max.kwh - 10.0).abs() < 1e-9);
        assert!((min.kwh - 10.0).abs() < 1e-9);
        assert_eq!(max.date, date!(2024-03-01));
        assert_eq!(min.date, date!(2024-03-02));
    }

    #[test]
    fn day_below_the_noise_floor_is_not_an_extreme() {
        let day_a = datetime!(2024-03-01 00:00:00 UTC);
        let day_b = datetime!(2024-03-02 00:00:00 UTC);
        let series = vec![
            reading(day_a, 100.0),
            reading(day_a + Duration::hours(1), 99.95),
            reading(day_b, 99.95),
            reading(day_b + Duration::hours(1), 99.0),
        ];

        let (max, min) = daily_extrema(&series, &utc_cfg());
        let max = max.expect("max expected");
        let min = min.expect("min expected");
        assert_eq!(max.date, date!(2024-03-02));
        assert_eq!(min.date, date!(2024-03-02));
        assert!((max.kwh - 0.95).abs() < 1e-9);
    }

    #[test]
    fn extrema_report_distinct_days() {
        let day_a = datetime!(2024-03-01 00:00:00 UTC);
        let day_b = datetime!(2024-03-02 00:00:00 UTC);
        let series = vec![
            reading(day_a, 10.0),
            reading(day_a + Duration::hours(1), 9.0),
            reading(day_a + Duration::hours(2), 8.0),
            reading(day_b, 8.0),
            reading(day_b + Duration::hours(1), 7.5),
        ];

        let (max, min) = daily_extrema(&series, &utc_cfg());
        let max = max.expect("max expected");
        let min = min.expect("min expected");
        assert_eq!(max.date, date!(2024-03-01));
        assert!((max.kwh - 2.0).abs() < 1e-9);
        assert_eq!(min.date, date!(2024-03-02));
        assert!((min.kwh - 0.5).abs() < 1e-9);
    }

    #[test]
    fn jump_of_exactly_the_threshold_is_not_a_recharge() {
        let t0 = datetime!(2024-03-10 00:00:00 UTC);
        let flat = vec![reading(t0, 50.0), reading(t0 + Duration::hours(1), 51.0)];
        assert!(last_recharge(&flat, 1.0).is_none());

        let jump = vec![reading(t0, 50.0), reading(t0 + Duration::hours(1), 51.5)];
        let (_, amount) = last_recharge(&jump, 1.0).expect("recharge expected");
        assert!((amount - 1.5).abs() < 1e-9);
    }

    #[test]
    fn backward_scan_reports_the_most_recent_recharge() {
        let t0 = datetime!(2024-03-10 00:00:00 UTC);
        let series = vec![
            reading(t0, 50.0),
            reading(t0 + Duration::hours(1), 150.0),
            reading(t0 + Duration::hours(2), 140.0),
            reading(t0 + Duration::hours(3), 200.0),
        ];

        let (ts, amount) = last_recharge(&series, 1.0).expect("recharge expected");
        assert_eq!(ts, t0 + Duration::hours(3));
        assert!((amount - 60.0).abs() < 1e-9);
    }

    #[test]
    fn empty_series_reports_everything_absent() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let snap = snapshot(&[], now, &AnalyticsConfig::default());
        assert_eq!(snap, AnalyticsSnapshot::default());
    }

    #[test]
    fn flat_series_forecasts_with_the_fallback_rate() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let series = vec![
            reading(now - Duration::days(7), 50.0),
            reading(now - Duration::days(4), 50.0),
            reading(now - Duration::days(1), 50.0),
            reading(now - Duration::hours(1), 50.0),
        ];

        let snap = snapshot(&series, now, &AnalyticsConfig::default());
        assert_eq!(snap.consumed_24h_kwh, Some(0.0));
        assert_eq!(snap.consumed_7d_kwh, Some(0.0));
        assert!(snap.max_daily.is_none());
        let days = snap.days_remaining.expect("forecast expected");
        assert!((days - 10.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_fallback_rate_leaves_the_forecast_absent() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let series = vec![
            reading(now - Duration::days(3), 40.0),
            reading(now - Duration::hours(1), 40.0),
        ];

        let zero = AnalyticsConfig {
            fallback_daily_kwh: 0.0,
            ..AnalyticsConfig::default()
        };
        let snap = snapshot(&series, now, &zero);
        assert_eq!(snap.current_kwh, Some(40.0));
        assert_eq!(snap.consumed_7d_kwh, Some(0.0));
        assert!(snap.days_remaining.is_none());

        let negative = AnalyticsConfig {
            fallback_daily_kwh: -2.0,
            ..AnalyticsConfig::default()
        };
        assert!(snapshot(&series, now, &negative).days_remaining.is_none());
    }

    #[test]
    fn forecast_prefers_the_last_day_rate() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let series = vec![
            reading(now - Duration::hours(20), 32.0),
            reading(now - Duration::hours(1), 30.0),
        ];

        let snap = snapshot(&series, now, &AnalyticsConfig::default());
        assert_eq!(snap.consumed_3h_kwh, Some(0.0));
        let days = snap.days_remaining.expect("forecast expected");
        assert!((days - 15.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_uses_the_weekly_rate_when_the_last_day_is_quiet() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let series = vec![
            reading(now - Duration::days(5), 57.0),
            reading(now - Duration::days(3), 50.0),
            reading(now - Duration::hours(1), 50.0),
        ];

        let snap = snapshot(&series, now, &AnalyticsConfig::default());
        assert_eq!(snap.consumed_24h_kwh, Some(0.0));
        let days = snap.days_remaining.expect("forecast expected");
        assert!((days - 50.0).abs() < 1e-9);
    }

    #[test]
    fn recharge_age_is_whole_days() {
        let now = datetime!(2024-03-10 12:00:00 UTC);
        let series = vec![
            reading(now - Duration::hours(61), 10.0),
            reading(now - Duration::hours(60), 110.0),
            reading(now - Duration::hours(1), 100.0),
        ];

        let snap = snapshot(&series, now, &AnalyticsConfig::default());
        let recharge = snap.last_recharge.expect("recharge expected");
        assert_eq!(recharge.ts, now - Duration::hours(60));
        assert!((recharge.amount_kwh - 100.0).abs() < 1e-9);
        assert_eq!(recharge.days_since, 2);
    }

    #[tokio::test]
    async fn compute_for_account_reads_normalizes_and_analyzes() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        db::init_schema(&pool).await.expect("schema");

        let now = datetime!(2024-03-10 12:00:00 UTC);
        let points = [
            (Duration::hours(30), 10.0),
            (Duration::hours(20), 5.0),
            (Duration::hours(10), 105.0),
        ];
        for (age, kwh) in points {
            let inserted = db::insert_reading_if_absent(&pool, "507", now - age, kwh)
                .await
                .expect("insert");
            assert!(inserted);
        }

        let cfg = AnalyticsConfig::default();
        let snap = compute_for_account(&pool, "507", now, 30, &cfg)
            .await
            .expect("analytics");
        assert_eq!(snap.current_kwh, Some(105.0));
        let recharge = snap.last_recharge.expect("recharge expected");
        assert!((recharge.amount_kwh - 100.0).abs() < 1e-9);
        assert_eq!(recharge.ts, now - Duration::hours(10));

        // Another account sees an empty store.
        let other = compute_for_account(&pool, "612", now, 30, &cfg)
            .await
            .expect("analytics");
        assert_eq!(other, AnalyticsSnapshot::default());
    }
}
