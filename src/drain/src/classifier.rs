//! Log object name classification.
//!
//! A log object is named `YYYY-MM-DDThh:mm:ss.mmm-<suffix>.log`. The whole
//! name must match; a match yields the calendar day encoded in the first ten
//! characters.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static LOG_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]{4})-([0-9]{2})-([0-9]{2})T[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{3}-.+\.log$",
    )
    .expect("log name pattern is valid")
});

/// Date components extracted from a log object name.
///
/// The components are taken verbatim from their fixed positions and are not
/// checked for calendar validity; use [`LogName::date`] for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogName {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl LogName {
    /// The embedded calendar day, or `None` if the digits do not form a real
    /// date (e.g. `2024-02-30`).
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
    }
}

/// Match `name` against the log naming convention.
///
/// Returns `None` for anything that is not exactly a log object name.
pub fn classify(name: &str) -> Option<LogName> {
    let caps = LOG_NAME_PATTERN.captures(name)?;

    // The pattern only admits ASCII digits here, so these parses cannot fail
    // on width or sign; `ok()?` keeps the function total regardless.
    Some(LogName {
        year: caps[1].parse().ok()?,
        month: caps[2].parse().ok()?,
        day: caps[3].parse().ok()?,
    })
}

/// The embedded calendar day of a log object name, if the name classifies and
/// the date is valid.
pub fn embedded_date(name: &str) -> Option<NaiveDate> {
    classify(name)?.date()
}
