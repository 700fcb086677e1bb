use crate::models::{PriceBar, PriceSeries};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("failed to decode response for {symbol}: {message}")]
    Decode { symbol: String, message: String },
    #[error("{0}")]
    Transport(String),
}

impl DataSourceError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            DataSourceError::Http(err) => err.is_timeout() || err.is_connect(),
            DataSourceError::Status { status, .. } => *status == 429 || *status >= 500,
            DataSourceError::Decode { .. } => false,
            DataSourceError::Transport(_) => true,
        }
    }
}

/// Provider of daily price history.
///
/// `price_series` returns an empty series when there is simply no data for
/// the window; errors are reserved for transport or decoding failures.
#[async_trait]
pub trait PriceDataSource: Send + Sync {
    /// Daily bars dated within `start..=end`.
    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataSourceError>;

    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, DataSourceError>;
}

#[async_trait]
impl<T> PriceDataSource for Arc<T>
where
    T: PriceDataSource + ?Sized,
{
    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataSourceError> {
        (**self).price_series(symbol, start, end).await
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, DataSourceError> {
        (**self).latest_price(symbol).await
    }
}

/// Price source backed by bars held in memory.
///
/// Symbols are matched exactly. Call counters and per-symbol failure
/// injection make it usable as a test double.
#[derive(Default)]
pub struct InMemoryPriceSource {
    series: HashMap<String, PriceSeries>,
    failing_symbols: HashSet<String>,
    series_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.insert_bars(symbol, bars);
        self
    }

    /// Every request for `symbol` fails with a transport error.
    pub fn with_failure(mut self, symbol: &str) -> Self {
        self.failing_symbols.insert(symbol.to_string());
        self
    }

    pub fn insert_bars(&mut self, symbol: &str, bars: Vec<PriceBar>) {
        self.series
            .insert(symbol.to_string(), PriceSeries::new(bars));
    }

    pub fn series_calls(&self) -> usize {
        self.series_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self, symbol: &str) -> Result<(), DataSourceError> {
        if self.failing_symbols.contains(symbol) {
            return Err(DataSourceError::Transport(format!(
                "simulated failure for {}",
                symbol
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceDataSource for InMemoryPriceSource {
    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataSourceError> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(symbol)?;
        Ok(self
            .series
            .get(symbol)
            .map(|series| series.restricted_to(start, end))
            .unwrap_or_default())
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, DataSourceError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(symbol)?;
        Ok(self
            .series
            .get(symbol)
            .and_then(|series| series.bars().last())
            .map(|bar| bar.close))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn bars() -> Vec<PriceBar> {
        (2..=6)
            .map(|d| PriceBar {
                date: day(2023, 1, d),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + d as f64,
            })
            .collect()
    }

    #[tokio::test]
    async fn in_memory_source_filters_to_inclusive_window() {
        let source = InMemoryPriceSource::new().with_bars("TCS.NS", bars());

        let series = source
            .price_series("TCS.NS", day(2023, 1, 3), day(2023, 1, 4))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(source.series_calls(), 1);

        let missing = source
            .price_series("INFY.NS", day(2023, 1, 3), day(2023, 1, 4))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn in_memory_latest_price_is_last_close() {
        let source = InMemoryPriceSource::new().with_bars("TCS.NS", bars());
        assert_eq!(source.latest_price("TCS.NS").await.unwrap(), Some(106.0));
        assert_eq!(source.latest_price("TCS.BO").await.unwrap(), None);
        assert_eq!(source.latest_calls(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_transient_transport_errors() {
        let source = InMemoryPriceSource::new().with_failure("BROKEN.NS");
        let err = source.latest_price("BROKEN.NS").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn status_errors_classify_by_code() {
        let throttled = DataSourceError::Status {
            status: 429,
            url: "http://localhost".to_string(),
            body: String::new(),
        };
        let missing = DataSourceError::Status {
            status: 400,
            url: "http://localhost".to_string(),
            body: String::new(),
        };
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }
}
