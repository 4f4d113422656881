use anyhow::Result;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::domain::Reading;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ReadingRow {
    ts: i64,
    account_id: String,
    kwh: f64,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = time::error::ComponentRange;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        Ok(Reading {
            ts: OffsetDateTime::from_unix_timestamp(row.ts)?,
            account_id: row.account_id,
            kwh: row.kwh,
        })
    }
}

/// Create the readings table if it does not exist.
///
/// `ts` is Unix seconds, so range filters and ordering are integer
/// comparisons. The UNIQUE pair makes (instant, account) a natural key.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            ts         INTEGER NOT NULL,
            account_id TEXT    NOT NULL,
            kwh        REAL    NOT NULL,
            UNIQUE (ts, account_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert one reading unless a row for the same instant and account is
/// already stored. Returns true iff the row was new; a concurrent writer
/// landing on the same key leaves exactly one row either way.
pub async fn insert_reading_if_absent(
    pool: &SqlitePool,
    account_id: &str,
    ts: OffsetDateTime,
    kwh: f64,
) -> Result<bool> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO readings (ts, account_id, kwh) VALUES (?, ?, ?)")
            .bind(ts.unix_timestamp())
            .bind(account_id)
            .bind(kwh)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetch readings strictly newer than `since`, ascending by instant,
/// optionally restricted to one account.
pub async fn readings_since(
    pool: &SqlitePool,
    account_id: Option<&str>,
    since: OffsetDateTime,
) -> Result<Vec<Reading>> {
    let rows: Vec<ReadingRow> = match account_id {
        Some(id) => {
            sqlx::query_as(
                r#"
                SELECT ts, account_id, kwh
                FROM readings
                WHERE ts > ? AND account_id = ?
                ORDER BY ts
                "#,
            )
            .bind(since.unix_timestamp())
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT ts, account_id, kwh
                FROM readings
                WHERE ts > ?
                ORDER BY ts
                "#,
            )
            .bind(since.unix_timestamp())
            .fetch_all(pool)
            .await?
        }
    };

    let mut readings = Vec::with_capacity(rows.len());
    for row in rows {
        readings.push(Reading::try_from(row)?);
    }
    Ok(readings)
}
