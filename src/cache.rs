use crate::models::PriceSeries;
use crate::price_source::{DataSourceError, PriceDataSource};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_HISTORICAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_LATEST_TTL: Duration = Duration::from_secs(5 * 60);

/// Freshness window per key class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub historical: Duration,
    pub latest: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            historical: DEFAULT_HISTORICAL_TTL,
            latest: DEFAULT_LATEST_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Clone)]
struct CachedEntry<T> {
    value: T,
    stored_at: Instant,
}

impl<T: Clone> CachedEntry<T> {
    fn fresh_value(&self, ttl: Duration) -> Option<T> {
        if self.stored_at.elapsed() < ttl {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

/// Caching decorator for any [`PriceDataSource`].
///
/// Series are keyed by `(symbol, start, end)` and latest prices by symbol.
/// Empty series and missing latest prices are never stored, so a symbol that
/// starts trading later is picked up on the next request. Concurrent misses
/// for the same key may both reach the inner source; the last write wins.
#[derive(Clone)]
pub struct CachedPriceSource<S> {
    inner: S,
    ttl: CacheTtl,
    series_cache: Arc<DashMap<SeriesKey, CachedEntry<PriceSeries>>>,
    latest_cache: Arc<DashMap<String, CachedEntry<f64>>>,
}

impl<S> CachedPriceSource<S>
where
    S: PriceDataSource,
{
    pub fn new(inner: S, ttl: CacheTtl) -> Self {
        Self {
            inner,
            ttl,
            series_cache: Arc::new(DashMap::new()),
            latest_cache: Arc::new(DashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cached_series_count(&self) -> usize {
        self.series_cache.len()
    }

    pub fn cached_latest_count(&self) -> usize {
        self.latest_cache.len()
    }

    pub fn clear(&self) {
        self.series_cache.clear();
        self.latest_cache.clear();
    }

    fn lookup_series(&self, key: &SeriesKey) -> Option<PriceSeries> {
        let entry = self.series_cache.get(key)?;
        let value = entry.fresh_value(self.ttl.historical);
        if value.is_none() {
            drop(entry);
            self.series_cache.remove(key);
        }
        value
    }

    fn lookup_latest(&self, symbol: &str) -> Option<f64> {
        let entry = self.latest_cache.get(symbol)?;
        let value = entry.fresh_value(self.ttl.latest);
        if value.is_none() {
            drop(entry);
            self.latest_cache.remove(symbol);
        }
        value
    }
}

#[async_trait]
impl<S> PriceDataSource for CachedPriceSource<S>
where
    S: PriceDataSource,
{
    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataSourceError> {
        let key = SeriesKey {
            symbol: symbol.to_string(),
            start,
            end,
        };

        if let Some(series) = self.lookup_series(&key) {
            log::debug!("Price cache hit for {} {}..={}", symbol, start, end);
            return Ok(series);
        }

        let series = self.inner.price_series(symbol, start, end).await?;
        if !series.is_empty() {
            self.series_cache.insert(
                key,
                CachedEntry {
                    value: series.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        Ok(series)
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, DataSourceError> {
        if let Some(price) = self.lookup_latest(symbol) {
            return Ok(Some(price));
        }

        let price = self.inner.latest_price(symbol).await?;
        if let Some(value) = price {
            self.latest_cache.insert(
                symbol.to_string(),
                CachedEntry {
                    value,
                    stored_at: Instant::now(),
                },
            );
        }
        Ok(price)
    }
}
