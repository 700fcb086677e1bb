use crate::models::PriceSeries;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;

/// Covers a weekend plus up to three consecutive holidays.
pub const DEFAULT_MAX_LOOKAHEAD_DAYS: u32 = 5;

/// Accepted signal date layouts, tried in order.
pub const SIGNAL_DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%y", "%d-%b-%Y",
];

/// Timestamp layouts produced by spreadsheet exports of date columns.
const SIGNAL_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Returns the first date present in `series` at an offset of
/// `0..=max_lookahead_days` calendar days from `target`.
///
/// Trading days are whatever the series contains, so no holiday calendar is
/// needed: a date absent from the data is treated as a non-trading day.
pub fn next_trading_day(
    target: NaiveDate,
    series: &PriceSeries,
    max_lookahead_days: u32,
) -> Option<NaiveDate> {
    (0..=i64::from(max_lookahead_days))
        .filter_map(|offset| target.checked_add_signed(Duration::days(offset)))
        .find(|candidate| series.contains(*candidate))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParseError {
    pub raw: String,
}

impl fmt::Display for DateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse date: {}", self.raw)
    }
}

impl std::error::Error for DateParseError {}

pub fn parse_signal_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    let trimmed = raw.trim();

    SIGNAL_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            SIGNAL_TIMESTAMP_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
                .map(|timestamp| timestamp.date())
        })
        .ok_or_else(|| DateParseError {
            raw: raw.to_string(),
        })
}
