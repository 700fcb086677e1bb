use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One daily OHLC bar. Dates carry no time component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Ascending, de-duplicated daily bars for a single symbol. A date missing
/// from the series is a non-trading day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by_key(|bar| bar.date);

        let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            if let Some(last) = deduped.last_mut() {
                if last.date == bar.date {
                    *last = bar;
                    continue;
                }
            }
            deduped.push(bar);
        }

        Self { bars: deduped }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|bar| bar.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|bar| bar.date)
    }

    pub fn get(&self, date: NaiveDate) -> Option<&PriceBar> {
        self.bars
            .binary_search_by_key(&date, |bar| bar.date)
            .ok()
            .map(|idx| &self.bars[idx])
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.get(date).is_some()
    }

    /// Bars dated within `start..=end`.
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> &[PriceBar] {
        if end < start {
            return &[];
        }
        let lower = self.bars.partition_point(|bar| bar.date < start);
        let upper = self.bars.partition_point(|bar| bar.date <= end);
        &self.bars[lower..upper]
    }

    /// Keeps only bars dated within `start..=end`.
    pub fn restricted_to(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            bars: self.range(start, end).to_vec(),
        }
    }
}

/// A raw input record. Only the symbol and date fields are read; key lookup
/// ignores case and surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub Map<String, Value>);

impl Signal {
    pub fn new(symbol: &str, date: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("symbol".to_string(), Value::String(symbol.to_string()));
        fields.insert("date".to_string(), Value::String(date.to_string()));
        Self(fields)
    }

    pub fn symbol(&self) -> Option<String> {
        self.field("symbol")
    }

    pub fn date(&self) -> Option<String> {
        self.field("date")
    }

    /// Looks up a field by case-insensitive name. Exact lowercase keys take
    /// precedence over other spellings. Blank strings and nulls are missing.
    pub fn field(&self, name: &str) -> Option<String> {
        if let Some(value) = self.0.get(name).and_then(field_value_to_string) {
            return Some(value);
        }

        self.0
            .iter()
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .find_map(|(_, value)| field_value_to_string(value))
    }
}

impl From<Map<String, Value>> for Signal {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

fn field_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalStatus {
    #[serde(rename = "Success")]
    Success,
    #[serde(rename = "Symbol Not Found")]
    SymbolNotFound,
    #[serde(rename = "Invalid Date")]
    InvalidDate,
    #[serde(rename = "No Data")]
    NoData,
    #[serde(rename = "No Entry Data")]
    NoEntryData,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Success => "Success",
            SignalStatus::SymbolNotFound => "Symbol Not Found",
            SignalStatus::InvalidDate => "Invalid Date",
            SignalStatus::NoData => "No Data",
            SignalStatus::NoEntryData => "No Entry Data",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SignalStatus::Success)
    }
}

/// Forward return measured at one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonOutcome {
    pub return_pct: f64,
    pub exit_price: f64,
    pub exit_date: NaiveDate,
}

/// Price extremes over `[entry_date, entry_date + window_days]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowExtremes {
    pub window_days: u32,
    pub max_high: f64,
    pub max_high_date: NaiveDate,
    pub min_low: f64,
    pub min_low_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    pub symbol: String,
    /// Aligned entry date (ISO) on success, otherwise the raw input date.
    pub signal_date: String,
    pub entry_price: f64,
    pub status: SignalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub horizons: BTreeMap<u32, HorizonOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extremes: Option<WindowExtremes>,
}

impl SignalResult {
    pub fn failed(symbol: &str, raw_date: &str, status: SignalStatus) -> Self {
        Self {
            symbol: symbol.to_string(),
            signal_date: raw_date.to_string(),
            entry_price: 0.0,
            status,
            entry_date: None,
            horizons: BTreeMap::new(),
            extremes: None,
        }
    }

    pub fn return_for(&self, horizon_days: u32) -> Option<f64> {
        self.horizons
            .get(&horizon_days)
            .map(|outcome| outcome.return_pct)
    }

    pub fn exit_price_for(&self, horizon_days: u32) -> Option<f64> {
        self.horizons
            .get(&horizon_days)
            .map(|outcome| outcome.exit_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonStats {
    pub avg_return: f64,
    pub win_rate: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub total_signals: usize,
    pub successful_signals: usize,
    pub failed_signals: usize,
    /// Signals without a symbol or date; not part of the three counts above.
    pub skipped_signals: usize,
    pub ranking_horizon: u32,
    pub horizon_stats: BTreeMap<u32, HorizonStats>,
    pub best_performer: Option<SignalResult>,
    pub worst_performer: Option<SignalResult>,
    pub trades: Vec<SignalResult>,
}

impl BacktestReport {
    pub fn stats_for(&self, horizon_days: u32) -> Option<&HorizonStats> {
        self.horizon_stats.get(&horizon_days)
    }
}

/// Rounds to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bar(date: NaiveDate, close: f64) -> PriceBar {
        PriceBar {
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn price_series_sorts_and_keeps_last_duplicate() {
        let series = PriceSeries::new(vec![
            bar(day(2023, 1, 4), 102.0),
            bar(day(2023, 1, 2), 100.0),
            bar(day(2023, 1, 4), 104.0),
            bar(day(2023, 1, 3), 101.0),
        ]);

        assert_eq!(series.len(), 3);
        assert_eq!(series.first_date(), Some(day(2023, 1, 2)));
        assert_eq!(series.get(day(2023, 1, 4)).map(|b| b.close), Some(104.0));
        assert!(!series.contains(day(2023, 1, 5)));
    }

    #[test]
    fn price_series_range_is_inclusive() {
        let series = PriceSeries::new(
            (2..=6)
                .map(|d| bar(day(2023, 1, d), 100.0 + d as f64))
                .collect(),
        );

        let window = series.range(day(2023, 1, 3), day(2023, 1, 5));
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].date, day(2023, 1, 3));
        assert_eq!(window[2].date, day(2023, 1, 5));
        assert!(series.range(day(2023, 1, 5), day(2023, 1, 3)).is_empty());
    }

    #[test]
    fn signal_fields_are_case_insensitive() {
        let signal: Signal = serde_json::from_value(json!({
            " Symbol ": "tcs",
            "DATE": "2023-01-02",
            "note": "ignored"
        }))
        .unwrap();

        assert_eq!(signal.symbol().as_deref(), Some("tcs"));
        assert_eq!(signal.date().as_deref(), Some("2023-01-02"));
    }

    #[test]
    fn signal_blank_and_null_fields_are_missing() {
        let signal: Signal = serde_json::from_value(json!({
            "symbol": "   ",
            "date": null
        }))
        .unwrap();

        assert!(signal.symbol().is_none());
        assert!(signal.date().is_none());
    }

    #[test]
    fn numeric_symbols_are_stringified() {
        let signal: Signal = serde_json::from_value(json!({
            "symbol": 500325,
            "date": "02/01/2023"
        }))
        .unwrap();

        assert_eq!(signal.symbol().as_deref(), Some("500325"));
    }

    #[test]
    fn status_serializes_with_labels() {
        let value = serde_json::to_value(SignalStatus::SymbolNotFound).unwrap();
        assert_eq!(value, json!("Symbol Not Found"));
        assert_eq!(SignalStatus::NoEntryData.as_str(), "No Entry Data");
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(10.0), 10.0);
        assert_eq!(round2(1.005_000_1), 1.01);
        assert_eq!(round2(-2.345_000_1), -2.35);
    }
}
