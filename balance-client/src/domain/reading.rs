use time::OffsetDateTime;

/// One observed balance sample: the credit remaining on an account at an
/// instant. `(ts, account_id)` is the natural key; the store never holds
/// two readings for the same account and instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub ts: OffsetDateTime,
    pub account_id: String,
    pub kwh: f64,
}
