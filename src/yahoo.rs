use crate::config::DataSourceSettings;
use crate::models::{PriceBar, PriceSeries};
use crate::price_source::{DataSourceError, PriceDataSource};
use crate::retry::retry_request;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const CLIENT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) signal-engine/0.1";
const MAX_ERROR_BODY_CHARS: usize = 512;
const LATEST_PRICE_RANGE: &str = "5d";

/// Daily history from the Yahoo Finance v8 chart endpoint.
///
/// Bars are dated in the exchange's local time zone and adjusted for splits
/// and dividends using the `adjclose` series. Unknown symbols come back as
/// empty series rather than errors.
pub struct YahooPriceSource {
    http: Client,
    base_url: String,
}

impl YahooPriceSource {
    pub fn new(settings: &DataSourceSettings) -> Result<Self> {
        let http = build_async_client(Some(settings.request_timeout))?;
        Ok(Self::with_client(http, &settings.yahoo_base_url))
    }

    pub fn with_client(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chart_url(&self, symbol: &str) -> Result<Url, DataSourceError> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            DataSourceError::Transport(format!("invalid base URL {}: {}", self.base_url, err))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                DataSourceError::Transport(format!(
                    "base URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        Ok(url)
    }

    async fn fetch_chart(
        &self,
        symbol: &str,
        query: &[(&str, String)],
    ) -> Result<Option<ChartResult>, DataSourceError> {
        let url = self.chart_url(symbol)?;
        let response = self.http.get(url.clone()).query(query).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Yahoo has no chart for {}", symbol);
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataSourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate_for_log(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let payload: ChartResponse =
            response
                .json()
                .await
                .map_err(|err| DataSourceError::Decode {
                    symbol: symbol.to_string(),
                    message: err.to_string(),
                })?;

        if let Some(error) = payload.chart.error {
            debug!(
                "Yahoo chart error for {}: {} {}",
                symbol,
                error.code.unwrap_or_default(),
                error.description.unwrap_or_default()
            );
            return Ok(None);
        }

        Ok(payload
            .chart
            .result
            .and_then(|results| results.into_iter().next()))
    }

    async fn fetch_chart_with_retry(
        &self,
        symbol: &str,
        query: Vec<(&str, String)>,
    ) -> Result<Option<ChartResult>, DataSourceError> {
        retry_request!(
            format!("Yahoo chart {}", symbol),
            self.fetch_chart(symbol, &query)
        )
    }
}

#[async_trait]
impl PriceDataSource for YahooPriceSource {
    async fn price_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataSourceError> {
        if end < start {
            return Ok(PriceSeries::empty());
        }

        // Pad by a day on each side: bar timestamps are exchange-local, the
        // period bounds are UTC.
        let period1 = unix_midnight(start - ChronoDuration::days(1));
        let period2 = unix_midnight(end + ChronoDuration::days(2));
        let query = vec![
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("interval", "1d".to_string()),
            ("events", "history".to_string()),
        ];

        let Some(chart) = self.fetch_chart_with_retry(symbol, query).await? else {
            return Ok(PriceSeries::empty());
        };
        let series = PriceSeries::new(chart.into_bars()).restricted_to(start, end);
        debug!(
            "Fetched {} bar(s) for {} between {} and {}",
            series.len(),
            symbol,
            start,
            end
        );
        Ok(series)
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, DataSourceError> {
        let query = vec![
            ("range", LATEST_PRICE_RANGE.to_string()),
            ("interval", "1d".to_string()),
        ];

        let Some(chart) = self.fetch_chart_with_retry(symbol, query).await? else {
            return Ok(None);
        };
        let series = PriceSeries::new(chart.into_bars());
        Ok(series.bars().last().map(|bar| bar.close))
    }
}

pub fn build_async_client(timeout: Option<Duration>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut builder = Client::builder().default_headers(headers);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
    #[serde(default)]
    adjclose: Vec<ChartAdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

impl ChartResult {
    /// Adjusted daily bars; rows with any missing price are dropped.
    fn into_bars(self) -> Vec<PriceBar> {
        let Some(quote) = self.indicators.quote.into_iter().next() else {
            return Vec::new();
        };
        let adjclose = self
            .indicators
            .adjclose
            .into_iter()
            .next()
            .map(|series| series.adjclose)
            .unwrap_or_default();
        let offset = self.meta.gmtoffset;

        let mut bars = Vec::with_capacity(self.timestamp.len());
        for (idx, timestamp) in self.timestamp.iter().enumerate() {
            let (Some(open), Some(high), Some(low), Some(close)) = (
                value_at(&quote.open, idx),
                value_at(&quote.high, idx),
                value_at(&quote.low, idx),
                value_at(&quote.close, idx),
            ) else {
                continue;
            };
            let Some(local) = DateTime::from_timestamp(timestamp + offset, 0) else {
                continue;
            };

            let factor = value_at(&adjclose, idx)
                .filter(|adjusted| *adjusted > 0.0 && close > 0.0)
                .map(|adjusted| adjusted / close)
                .unwrap_or(1.0);

            bars.push(PriceBar {
                date: local.date_naive(),
                open: open * factor,
                high: high * factor,
                low: low * factor,
                close: close * factor,
            });
        }
        bars
    }
}

fn value_at(values: &[Option<f64>], idx: usize) -> Option<f64> {
    values
        .get(idx)
        .copied()
        .flatten()
        .filter(|value| value.is_finite())
}
