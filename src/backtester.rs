use crate::calendar::{next_trading_day, parse_signal_date};
use crate::config::BacktestConfig;
use crate::models::{
    round2, BacktestReport, HorizonOutcome, PriceSeries, Signal, SignalResult, SignalStatus,
    WindowExtremes,
};
use crate::price_source::PriceDataSource;
use crate::report::ReportAggregator;
use crate::resolver::SymbolResolver;
use crate::run_status::ProgressSink;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::time::Instant;

const UNKNOWN_SYMBOL_LABEL: &str = "Unknown";

/// Evaluates signals against the price action that followed them.
///
/// Per-signal problems (unknown symbol, unparseable date, missing prices)
/// become a status on that signal's result. Only a failing price fetch
/// aborts the run, since the engine cannot tell a broken source from an
/// empty one otherwise.
pub struct SignalBacktester<'a, S: ?Sized> {
    source: &'a S,
    config: BacktestConfig,
}

impl<'a, S> SignalBacktester<'a, S>
where
    S: PriceDataSource + ?Sized,
{
    pub fn new(source: &'a S, config: BacktestConfig) -> Result<Self> {
        let config = config.validated()?;
        if !config.horizons.contains(&config.ranking_horizon) {
            warn!(
                "Ranking horizon {}d is not among the configured horizons {:?}; best/worst performers will be empty",
                config.ranking_horizon, config.horizons
            );
        }
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Processes signals strictly in order, one at a time.
    pub async fn run(
        &self,
        signals: &[Signal],
        progress: Option<&dyn ProgressSink>,
    ) -> Result<BacktestReport> {
        self.run_concurrent(signals, progress, 1).await
    }

    /// Processes up to `concurrency` signals at once. Results keep input
    /// order; progress notifications may interleave when `concurrency > 1`.
    pub async fn run_concurrent(
        &self,
        signals: &[Signal],
        progress: Option<&dyn ProgressSink>,
        concurrency: usize,
    ) -> Result<BacktestReport> {
        let concurrency = concurrency.max(1);
        let total = signals.len();
        let started = Instant::now();
        info!(
            "Backtesting {} signal(s) over a {}d window (horizons {:?}, concurrency {})",
            total, self.config.evaluation_window_days, self.config.horizons, concurrency
        );

        let resolver = SymbolResolver::new(self.source, self.config.suffixes.clone());
        let resolved_symbols: DashMap<String, Option<String>> = DashMap::new();

        let outcomes: Vec<Option<SignalResult>> = stream::iter(signals.iter().enumerate())
            .map(|(idx, signal)| {
                let resolver = &resolver;
                let resolved_symbols = &resolved_symbols;
                async move {
                    notify_progress(progress, idx + 1, total, signal);
                    self.process_signal(signal, resolver, resolved_symbols)
                        .await
                }
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        let skipped_signals = outcomes.iter().filter(|outcome| outcome.is_none()).count();
        if skipped_signals > 0 {
            warn!(
                "Skipped {} signal(s) without a symbol or date",
                skipped_signals
            );
        }
        let results: Vec<SignalResult> = outcomes.into_iter().flatten().collect();

        let report = ReportAggregator::aggregate(
            results,
            skipped_signals,
            &self.config.horizons,
            self.config.ranking_horizon,
        );
        info!(
            "Backtest finished in {:.2}s: {} total, {} successful, {} failed",
            started.elapsed().as_secs_f64(),
            report.total_signals,
            report.successful_signals,
            report.failed_signals
        );
        Ok(report)
    }

    /// Runs the full pipeline for one signal. `Ok(None)` means the signal
    /// lacked a symbol or date and is excluded from the report counts.
    async fn process_signal(
        &self,
        signal: &Signal,
        resolver: &SymbolResolver<'a, S>,
        resolved_symbols: &DashMap<String, Option<String>>,
    ) -> Result<Option<SignalResult>> {
        let (Some(raw_symbol), Some(raw_date)) = (signal.symbol(), signal.date()) else {
            debug!("Skipping signal without symbol or date: {:?}", signal.0);
            return Ok(None);
        };

        let Some(symbol) = resolver
            .resolve_memoized(&raw_symbol, resolved_symbols)
            .await
        else {
            debug!("Could not resolve symbol {}", raw_symbol);
            return Ok(Some(SignalResult::failed(
                &raw_symbol,
                &raw_date,
                SignalStatus::SymbolNotFound,
            )));
        };

        let signal_date = match parse_signal_date(&raw_date) {
            Ok(date) => date,
            Err(err) => {
                debug!("{} for {}", err, symbol);
                return Ok(Some(SignalResult::failed(
                    &symbol,
                    &raw_date,
                    SignalStatus::InvalidDate,
                )));
            }
        };

        let fetch_end = add_days(signal_date, self.config.fetch_span_days());
        let series = self
            .source
            .price_series(&symbol, signal_date, fetch_end)
            .await
            .with_context(|| {
                format!(
                    "Failed to fetch prices for {} between {} and {}",
                    symbol, signal_date, fetch_end
                )
            })?;

        if series.is_empty() {
            debug!(
                "No prices for {} between {} and {}",
                symbol, signal_date, fetch_end
            );
            return Ok(Some(SignalResult::failed(
                &symbol,
                &raw_date,
                SignalStatus::NoData,
            )));
        }

        let result = evaluate_series(&symbol, &raw_date, signal_date, &series, &self.config);
        debug!(
            "{} @ {}: {} ({} horizon(s))",
            result.symbol,
            result.signal_date,
            result.status.as_str(),
            result.horizons.len()
        );
        Ok(Some(result))
    }
}

/// Computes entry, horizon returns and window extremes for a signal whose
/// symbol and date are already known and whose prices were fetched.
pub fn evaluate_series(
    symbol: &str,
    raw_date: &str,
    signal_date: NaiveDate,
    series: &PriceSeries,
    config: &BacktestConfig,
) -> SignalResult {
    let entry = next_trading_day(signal_date, series, config.max_lookahead_days)
        .and_then(|date| series.get(date))
        .filter(|bar| bar.close.is_finite() && bar.close > 0.0);
    let Some(entry) = entry else {
        return SignalResult::failed(symbol, raw_date, SignalStatus::NoEntryData);
    };
    let entry_price = entry.close;

    let mut horizons = BTreeMap::new();
    for horizon in config
        .horizons
        .iter()
        .copied()
        .filter(|h| *h <= config.evaluation_window_days)
    {
        let target = add_days(entry.date, horizon);
        let Some(exit) = next_trading_day(target, series, config.max_lookahead_days)
            .and_then(|date| series.get(date))
            .filter(|bar| bar.close.is_finite())
        else {
            continue;
        };
        horizons.insert(
            horizon,
            HorizonOutcome {
                return_pct: round2((exit.close - entry_price) / entry_price * 100.0),
                exit_price: round2(exit.close),
                exit_date: exit.date,
            },
        );
    }

    let window_end = add_days(entry.date, config.evaluation_window_days);
    let extremes = window_extremes(series, entry.date, window_end, config.evaluation_window_days);

    SignalResult {
        symbol: symbol.to_string(),
        signal_date: entry.date.format("%Y-%m-%d").to_string(),
        entry_price,
        status: SignalStatus::Success,
        entry_date: Some(entry.date),
        horizons,
        extremes,
    }
}

/// Highest high and lowest low within `start..=end`; earliest date wins ties.
fn window_extremes(
    series: &PriceSeries,
    start: NaiveDate,
    end: NaiveDate,
    window_days: u32,
) -> Option<WindowExtremes> {
    let mut window = series
        .range(start, end)
        .iter()
        .filter(|bar| bar.high.is_finite() && bar.low.is_finite());
    let first = window.next()?;

    let mut max_bar = first;
    let mut min_bar = first;
    for bar in window {
        if bar.high > max_bar.high {
            max_bar = bar;
        }
        if bar.low < min_bar.low {
            min_bar = bar;
        }
    }

    Some(WindowExtremes {
        window_days,
        max_high: round2(max_bar.high),
        max_high_date: max_bar.date,
        min_low: round2(min_bar.low),
        min_low_date: min_bar.date,
    })
}

fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_signed(Duration::days(i64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

fn notify_progress(
    progress: Option<&dyn ProgressSink>,
    current: usize,
    total: usize,
    signal: &Signal,
) {
    let Some(sink) = progress else {
        return;
    };
    let label = signal
        .symbol()
        .unwrap_or_else(|| UNKNOWN_SYMBOL_LABEL.to_string());
    if let Err(err) = sink.on_progress(current, total, &label) {
        warn!("Progress notification {}/{} failed: {}", current, total, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceBar;

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64) -> PriceBar {
        PriceBar {
            date,
            open: close,
            high: close + 5.0,
            low: close - 5.0,
            close,
        }
    }

    #[test]
    fn non_finite_exit_close_leaves_horizon_empty() {
        let series = PriceSeries::new(vec![
            bar(day(2023, 1, 2), 100.0),
            bar(day(2023, 1, 9), f64::NAN),
            bar(day(2023, 1, 16), f64::INFINITY),
            bar(day(2023, 2, 1), 120.0),
        ]);
        let config = BacktestConfig {
            horizons: vec![7, 14, 30],
            ..BacktestConfig::default()
        };

        let result = evaluate_series("TCS.NS", "2023-01-02", day(2023, 1, 2), &series, &config);

        assert_eq!(result.status, SignalStatus::Success);
        assert!(result.return_for(7).is_none());
        assert!(result.return_for(14).is_none());
        assert_eq!(result.return_for(30), Some(20.0));
        assert!(result
            .horizons
            .values()
            .all(|outcome| outcome.return_pct.is_finite()));
        let extremes = result.extremes.unwrap();
        assert_eq!(extremes.max_high, 125.0);
        assert_eq!(extremes.max_high_date, day(2023, 2, 1));
        assert_eq!(extremes.min_low, 95.0);
    }

    #[test]
    fn entry_rolls_to_next_trading_day_and_returns_use_close() {
        // Signal on Saturday 2023-01-07, first trading day Monday 2023-01-09.
        let series = PriceSeries::new(vec![
            bar(day(2023, 1, 9), 100.0),
            bar(day(2023, 1, 16), 110.0),
        ]);
        let config = BacktestConfig {
            horizons: vec![7],
            ..BacktestConfig::default()
        };

        let result = evaluate_series("TCS.NS", "2023-01-07", day(2023, 1, 7), &series, &config);

        assert_eq!(result.status, SignalStatus::Success);
        assert_eq!(result.entry_date, Some(day(2023, 1, 9)));
        assert_eq!(result.signal_date, "2023-01-09");
        assert_eq!(result.entry_price, 100.0);
        assert_eq!(result.return_for(7), Some(10.0));
        assert_eq!(result.exit_price_for(7), Some(110.0));
    }

    #[test]
    fn unalignable_horizons_are_left_out() {
        let series = PriceSeries::new(vec![
            bar(day(2023, 1, 2), 100.0),
            bar(day(2023, 1, 9), 101.0),
        ]);
        let config = BacktestConfig {
            horizons: vec![7, 14],
            ..BacktestConfig::default()
        };

        let result = evaluate_series("TCS.NS", "2023-01-02", day(2023, 1, 2), &series, &config);

        assert_eq!(result.status, SignalStatus::Success);
        assert!(result.return_for(7).is_some());
        assert!(result.return_for(14).is_none());
    }

    #[test]
    fn missing_entry_within_lookahead_is_no_entry_data() {
        let series = PriceSeries::new(vec![bar(day(2023, 1, 20), 100.0)]);
        let result = evaluate_series(
            "TCS.NS",
            "2023-01-02",
            day(2023, 1, 2),
            &series,
            &BacktestConfig::default(),
        );

        assert_eq!(result.status, SignalStatus::NoEntryData);
        assert_eq!(result.entry_price, 0.0);
        assert_eq!(result.signal_date, "2023-01-02");
        assert!(result.horizons.is_empty());
        assert!(result.extremes.is_none());
    }

    #[test]
    fn zero_close_cannot_be_an_entry() {
        let series = PriceSeries::new(vec![bar(day(2023, 1, 2), 0.0)]);
        let result = evaluate_series(
            "TCS.NS",
            "2023-01-02",
            day(2023, 1, 2),
            &series,
            &BacktestConfig::default(),
        );
        assert_eq!(result.status, SignalStatus::NoEntryData);
    }

    #[test]
    fn extremes_cover_the_window_and_prefer_earliest_ties() {
        let mut bars = vec![
            bar(day(2023, 1, 2), 100.0),
            bar(day(2023, 1, 3), 120.0),
            bar(day(2023, 1, 4), 120.0),
            bar(day(2023, 1, 5), 90.0),
            // Outside a 10 day window.
            bar(day(2023, 1, 20), 500.0),
        ];
        bars.push(bar(day(2023, 1, 12), 90.0));
        let series = PriceSeries::new(bars);
        let config = BacktestConfig {
            horizons: vec![7],
            evaluation_window_days: 10,
            ..BacktestConfig::default()
        };

        let result = evaluate_series("TCS.NS", "2023-01-02", day(2023, 1, 2), &series, &config);
        let extremes = result.extremes.unwrap();

        assert_eq!(extremes.window_days, 10);
        assert_eq!(extremes.max_high, 125.0);
        assert_eq!(extremes.max_high_date, day(2023, 1, 3));
        assert_eq!(extremes.min_low, 85.0);
        assert_eq!(extremes.min_low_date, day(2023, 1, 5));
    }

    #[test]
    fn returns_and_exit_prices_round_to_two_decimals() {
        let series = PriceSeries::new(vec![
            bar(day(2023, 1, 2), 3.0),
            bar(day(2023, 1, 9), 3.123_456),
        ]);
        let config = BacktestConfig {
            horizons: vec![7],
            ..BacktestConfig::default()
        };

        let result = evaluate_series("X.NS", "2023-01-02", day(2023, 1, 2), &series, &config);

        assert_eq!(result.entry_price, 3.0);
        assert_eq!(result.exit_price_for(7), Some(3.12));
        assert_eq!(result.return_for(7), Some(4.12));
    }
}
