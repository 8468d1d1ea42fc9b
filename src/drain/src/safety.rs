//! Decides whether a log object is old enough to be consumed.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::classifier::embedded_date;

/// How far behind "now" the default cutoff trails, so that objects written
/// just before midnight UTC are not picked up while still being appended to.
pub const DEFAULT_CUTOFF_LAG_HOURS: i64 = 2;

/// Returns true iff `name` is a log object whose embedded date is strictly
/// before `cutoff`.
///
/// Names that do not classify, or carry an impossible date, are never safe.
pub fn is_safe_to_process(name: &str, cutoff: NaiveDate) -> bool {
    match embedded_date(name) {
        Some(date) => date < cutoff,
        None => false,
    }
}

/// The UTC calendar day of `now` minus [`DEFAULT_CUTOFF_LAG_HOURS`].
pub fn default_cutoff(now: DateTime<Utc>) -> NaiveDate {
    (now - Duration::hours(DEFAULT_CUTOFF_LAG_HOURS)).date_naive()
}
