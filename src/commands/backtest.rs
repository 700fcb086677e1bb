use crate::backtester::SignalBacktester;
use crate::cache::CachedPriceSource;
use crate::config::{BacktestConfig, DataSourceSettings};
use crate::models::{BacktestReport, Signal};
use crate::run_status::ProgressSink;
use crate::yahoo::YahooPriceSource;
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Command-line overrides layered over the environment settings.
#[derive(Debug, Clone, Default)]
pub struct BacktestOptions {
    pub signals_file: PathBuf,
    pub output: Option<PathBuf>,
    pub horizons: Vec<u32>,
    pub window_days: Option<u32>,
    pub custom_horizon: Option<u32>,
    pub ranking_horizon: Option<u32>,
    pub concurrency: usize,
    pub show_progress: bool,
}

pub async fn run(settings: &HashMap<String, String>, options: BacktestOptions) -> Result<()> {
    let config = build_config(settings, &options)?;
    let data_settings = DataSourceSettings::from_settings_map(settings)?;

    let signals = load_signals(&options.signals_file)?;
    info!(
        "Loaded {} signal(s) from {}",
        signals.len(),
        options.signals_file.display()
    );

    let source = CachedPriceSource::new(
        YahooPriceSource::new(&data_settings)?,
        data_settings.cache_ttl,
    );
    let backtester = SignalBacktester::new(&source, config)?;

    let progress = options.show_progress.then(|| ProgressBarSink::new(signals.len()));
    let report = backtester
        .run_concurrent(
            &signals,
            progress.as_ref().map(|sink| sink as &dyn ProgressSink),
            options.concurrency,
        )
        .await?;
    if let Some(progress) = progress {
        progress.finish();
    }

    log_summary(&report);

    let rendered = serde_json::to_string_pretty(&report)?;
    match &options.output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

/// Applies overrides in a fixed order: explicit horizons, then the window,
/// then the ranking horizon, then any custom horizon. Only default horizons
/// are trimmed to a shorter window; explicit ones must fit it.
pub fn build_config(
    settings: &HashMap<String, String>,
    options: &BacktestOptions,
) -> Result<BacktestConfig> {
    let mut config = BacktestConfig::from_settings_map(settings)?;
    let horizons_pinned =
        !options.horizons.is_empty() || BacktestConfig::horizons_in_settings(settings);

    if !options.horizons.is_empty() {
        config.horizons = options.horizons.clone();
    }
    if let Some(ranking_horizon) = options.ranking_horizon {
        config.ranking_horizon = ranking_horizon;
    }
    config = match options.window_days {
        Some(window_days) if !horizons_pinned => {
            config.with_evaluation_window(window_days)?
        }
        Some(window_days) => {
            config.evaluation_window_days = window_days;
            config.validated()?
        }
        None => config.validated()?,
    };
    if let Some(custom_horizon) = options.custom_horizon {
        config = config.with_custom_horizon(custom_horizon)?;
    }

    Ok(config)
}

/// Reads a JSON array of signal objects.
pub fn load_signals(path: &Path) -> Result<Vec<Signal>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read signals from {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Signals file {} is not valid JSON", path.display()))?;

    let serde_json::Value::Array(items) = value else {
        return Err(anyhow!(
            "Signals file {} must contain a JSON array",
            path.display()
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            serde_json::Value::Object(fields) => Ok(Signal::from(fields)),
            other => Err(anyhow!(
                "Signal #{} in {} is not an object: {}",
                idx + 1,
                path.display(),
                other
            )),
        })
        .collect()
}

fn log_summary(report: &BacktestReport) {
    info!(
        "Signals: {} total, {} successful, {} failed, {} skipped",
        report.total_signals,
        report.successful_signals,
        report.failed_signals,
        report.skipped_signals
    );
    for (horizon, stats) in &report.horizon_stats {
        info!(
            "{:>3}d: avg {:.2}%, win rate {:.2}% over {} signal(s)",
            horizon, stats.avg_return, stats.win_rate, stats.sample_size
        );
    }
    match (&report.best_performer, &report.worst_performer) {
        (Some(best), Some(worst)) => {
            info!(
                "Best {}d: {} {:.2}% | Worst {}d: {} {:.2}%",
                report.ranking_horizon,
                best.symbol,
                best.return_for(report.ranking_horizon).unwrap_or_default(),
                report.ranking_horizon,
                worst.symbol,
                worst.return_for(report.ranking_horizon).unwrap_or_default()
            );
        }
        _ => warn!(
            "No signal reached the {}d ranking horizon",
            report.ranking_horizon
        ),
    }
}

struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_with_message("Backtest completed");
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_progress(&self, current: usize, total: usize, symbol: &str) -> Result<()> {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
        self.bar.set_message(symbol.to_string());
        Ok(())
    }
}
