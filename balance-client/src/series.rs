use crate::domain::Reading;

/// Turn a raw batch of readings for one account into an ascending,
/// deduplicated series.
///
/// Rules:
/// - Readings whose balance is not a finite non-negative number are dropped.
/// - Ordering is ascending by timestamp; the sort is stable.
/// - Among readings sharing the exact same timestamp, the last one in input
///   order is kept.
///
/// Total function: an empty input yields an empty series.
pub fn normalize(mut readings: Vec<Reading>) -> Vec<Reading> {
    readings.retain(|r| r.kwh.is_finite() && r.kwh >= 0.0);
    readings.sort_by(|a, b| a.ts.cmp(&b.ts));

    let mut series: Vec<Reading> = Vec::with_capacity(readings.len());
    for reading in readings {
        match series.last_mut() {
            Some(last) if last.ts == reading.ts => *last = reading,
            _ => series.push(reading),
        }
    }
    series
}
