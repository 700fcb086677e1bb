use crate::cache::CacheTtl;
use crate::calendar::DEFAULT_MAX_LOOKAHEAD_DAYS;
use crate::resolver::ExchangeSuffixes;
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub const DEFAULT_HORIZONS: [u32; 6] = [7, 14, 30, 45, 60, 90];
pub const DEFAULT_EVALUATION_WINDOW_DAYS: u32 = 90;
pub const DEFAULT_RANKING_HORIZON: u32 = 30;
/// Smallest padding added past the evaluation window when fetching prices.
pub const MIN_FETCH_BUFFER_DAYS: u32 = 10;

pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_YAHOO_TIMEOUT_SECS: u64 = 30;

/// Engine parameters for one backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    /// Distinct positive horizons in calendar days, ascending.
    pub horizons: Vec<u32>,
    pub evaluation_window_days: u32,
    pub fetch_buffer_days: u32,
    pub max_lookahead_days: u32,
    /// Horizon used to pick best and worst performers.
    pub ranking_horizon: u32,
    pub suffixes: ExchangeSuffixes,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            horizons: DEFAULT_HORIZONS.to_vec(),
            evaluation_window_days: DEFAULT_EVALUATION_WINDOW_DAYS,
            fetch_buffer_days: MIN_FETCH_BUFFER_DAYS,
            max_lookahead_days: DEFAULT_MAX_LOOKAHEAD_DAYS,
            ranking_horizon: DEFAULT_RANKING_HORIZON,
            suffixes: ExchangeSuffixes::default(),
        }
    }
}

impl BacktestConfig {
    /// Reads optional `BACKTEST_*` overrides on top of the defaults.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let evaluation_window_days = optional_setting_u32(
            settings,
            "BACKTEST_WINDOW_DAYS",
            defaults.evaluation_window_days,
            1,
        )?;
        // Default horizons shrink with a shorter window; explicit ones must fit.
        let horizons = match optional_setting(settings, "BACKTEST_HORIZONS") {
            Some(_) => require_setting_u32_list(settings, "BACKTEST_HORIZONS")?,
            None => horizons_within(&defaults.horizons, evaluation_window_days),
        };
        let fetch_buffer_days = optional_setting_u32(
            settings,
            "BACKTEST_FETCH_BUFFER_DAYS",
            defaults.fetch_buffer_days,
            MIN_FETCH_BUFFER_DAYS,
        )?;
        let max_lookahead_days = optional_setting_u32(
            settings,
            "BACKTEST_MAX_LOOKAHEAD_DAYS",
            defaults.max_lookahead_days,
            0,
        )?;
        let ranking_horizon = optional_setting_u32(
            settings,
            "BACKTEST_RANKING_HORIZON",
            defaults.ranking_horizon,
            1,
        )?;
        let suffixes = ExchangeSuffixes {
            primary: optional_suffix(settings, "BACKTEST_PRIMARY_SUFFIX")
                .unwrap_or(defaults.suffixes.primary),
            secondary: optional_suffix(settings, "BACKTEST_SECONDARY_SUFFIX")
                .unwrap_or(defaults.suffixes.secondary),
        };

        Self {
            horizons,
            evaluation_window_days,
            fetch_buffer_days,
            max_lookahead_days,
            ranking_horizon,
            suffixes,
        }
        .validated()
    }

    /// Whether `BACKTEST_HORIZONS` pins the horizon set.
    pub fn horizons_in_settings(settings: &HashMap<String, String>) -> bool {
        optional_setting(settings, "BACKTEST_HORIZONS").is_some()
    }

    /// Normalizes the horizon set (sorted, de-duplicated) and checks every
    /// bound. Horizons longer than the evaluation window are rejected.
    pub fn validated(mut self) -> Result<Self> {
        if self.evaluation_window_days == 0 {
            return Err(anyhow!("Evaluation window must be at least one day"));
        }
        if self.fetch_buffer_days < MIN_FETCH_BUFFER_DAYS {
            return Err(anyhow!(
                "Fetch buffer must be >= {} days (value: {})",
                MIN_FETCH_BUFFER_DAYS,
                self.fetch_buffer_days
            ));
        }
        if self.horizons.is_empty() {
            return Err(anyhow!("At least one horizon is required"));
        }
        if let Some(zero) = self.horizons.iter().find(|h| **h == 0) {
            return Err(anyhow!("Horizons must be positive (value: {})", zero));
        }

        let horizons: BTreeSet<u32> = self.horizons.iter().copied().collect();
        if let Some(too_long) = horizons
            .iter()
            .find(|h| **h > self.evaluation_window_days)
        {
            return Err(anyhow!(
                "Horizon {}d exceeds the {}d evaluation window",
                too_long,
                self.evaluation_window_days
            ));
        }
        self.horizons = horizons.into_iter().collect();

        if self.ranking_horizon == 0 {
            return Err(anyhow!("Ranking horizon must be positive"));
        }
        if self.suffixes.primary.trim().is_empty() || self.suffixes.secondary.trim().is_empty() {
            return Err(anyhow!("Exchange suffixes must not be empty"));
        }

        Ok(self)
    }

    /// Adds a caller-chosen horizon, widening the evaluation window when the
    /// horizon reaches past it.
    pub fn with_custom_horizon(mut self, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(anyhow!("Custom horizon must be positive"));
        }
        if !self.horizons.contains(&days) {
            self.horizons.push(days);
        }
        self.evaluation_window_days = self.evaluation_window_days.max(days);
        self.validated()
    }

    /// Replaces the evaluation window, dropping horizons that no longer fit.
    pub fn with_evaluation_window(mut self, days: u32) -> Result<Self> {
        self.evaluation_window_days = days;
        self.horizons = horizons_within(&self.horizons, days);
        self.validated()
    }

    /// Calendar days fetched past the signal date. The buffer always covers
    /// both the entry shift and the exit shift allowed by the lookahead.
    pub fn fetch_span_days(&self) -> u32 {
        let buffer = self
            .fetch_buffer_days
            .max(self.max_lookahead_days.saturating_mul(2));
        self.evaluation_window_days.saturating_add(buffer)
    }
}

/// Settings for the HTTP price source and its cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceSettings {
    pub yahoo_base_url: String,
    pub request_timeout: Duration,
    pub cache_ttl: CacheTtl,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            yahoo_base_url: DEFAULT_YAHOO_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_YAHOO_TIMEOUT_SECS),
            cache_ttl: CacheTtl::default(),
        }
    }
}

impl DataSourceSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let yahoo_base_url = optional_setting(settings, "YAHOO_BASE_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or(defaults.yahoo_base_url);
        if !yahoo_base_url.starts_with("http://") && !yahoo_base_url.starts_with("https://") {
            return Err(anyhow!(
                "YAHOO_BASE_URL must be an http(s) URL (value: {})",
                yahoo_base_url
            ));
        }

        let request_timeout = Duration::from_secs(optional_setting_u64(
            settings,
            "YAHOO_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
            1,
        )?);
        let cache_ttl = CacheTtl {
            historical: Duration::from_secs(optional_setting_u64(
                settings,
                "PRICE_CACHE_HISTORICAL_TTL_SECS",
                defaults.cache_ttl.historical.as_secs(),
                0,
            )?),
            latest: Duration::from_secs(optional_setting_u64(
                settings,
                "PRICE_CACHE_LATEST_TTL_SECS",
                defaults.cache_ttl.latest.as_secs(),
                0,
            )?),
        };

        Ok(Self {
            yahoo_base_url,
            request_timeout,
            cache_ttl,
        })
    }
}

fn horizons_within(horizons: &[u32], window_days: u32) -> Vec<u32> {
    horizons
        .iter()
        .copied()
        .filter(|horizon| *horizon <= window_days)
        .collect()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn optional_suffix(settings: &HashMap<String, String>, key: &str) -> Option<String> {
    optional_setting(settings, key).map(|value| {
        let upper = value.to_uppercase();
        if upper.starts_with('.') {
            upper
        } else {
            format!(".{}", upper)
        }
    })
}

fn optional_setting_u64(
    settings: &HashMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
) -> Result<u64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn optional_setting_u32(
    settings: &HashMap<String, String>,
    key: &str,
    default: u32,
    min: u32,
) -> Result<u32> {
    let value = optional_setting_u64(settings, key, u64::from(default), u64::from(min))?;
    u32::try_from(value).map_err(|_| anyhow!("Setting {} is too large (value: {})", key, value))
}

fn require_setting_u32_list(settings: &HashMap<String, String>, key: &str) -> Result<Vec<u32>> {
    let raw = require_setting(settings, key)?;
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry.parse::<u32>().map_err(|_| {
            anyhow!(
                "Setting {} must be a list of whole days (value: {})",
                key,
                raw
            )
        })?;
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one horizon (value: {})",
            key,
            raw
        ));
    }

    Ok(values)
}
