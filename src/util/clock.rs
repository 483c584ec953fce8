//! Wall-clock helpers.

use chrono::{DateTime, Days, NaiveDate, Utc};

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Calendar day after `today`.
#[must_use]
pub fn tomorrow(today: NaiveDate) -> NaiveDate {
    today.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)
}

/// Convert the distance from `now` to `at` into a tokio deadline.
/// Instants in the past map to "now".
#[must_use]
pub fn deadline_for(at: DateTime<Utc>, now: DateTime<Utc>) -> tokio::time::Instant {
    let wait = (at - now).to_std().unwrap_or_default();
    tokio::time::Instant::now() + wait
}
