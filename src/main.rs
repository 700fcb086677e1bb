use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use signal_engine::commands::{
    backtest::{self, BacktestOptions},
    resolve,
};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(about = "Backtests trading signals against the price action that followed them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest a JSON array of signals and print the report
    Run {
        /// Path to the signals file
        signals_file: PathBuf,
        /// Write the report here instead of stdout
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Comma separated horizons in calendar days (defaults to BACKTEST_HORIZONS)
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        horizons: Vec<u32>,
        /// Evaluation window in calendar days
        #[arg(long = "window-days")]
        window_days: Option<u32>,
        /// Extra horizon to evaluate; widens the window when needed
        #[arg(long = "custom-horizon")]
        custom_horizon: Option<u32>,
        /// Horizon used to pick best and worst performers
        #[arg(long = "ranking-horizon")]
        ranking_horizon: Option<u32>,
        /// Number of signals evaluated at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
        /// Hide the progress bar
        #[arg(long = "no-progress")]
        no_progress: bool,
    },
    /// Resolve raw tickers to exchange-qualified symbols
    Resolve {
        /// Raw symbols such as TCS or INFY.NS
        #[arg(required = true)]
        symbols: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting signal-engine. Past performance does not predict future returns.");

    let settings: HashMap<String, String> = env::vars().collect();

    match command {
        Commands::Run {
            signals_file,
            output,
            horizons,
            window_days,
            custom_horizon,
            ranking_horizon,
            concurrency,
            no_progress,
        } => {
            let options = BacktestOptions {
                signals_file,
                output,
                horizons,
                window_days,
                custom_horizon,
                ranking_horizon,
                concurrency,
                show_progress: !no_progress,
            };
            backtest::run(&settings, options).await?;
        }
        Commands::Resolve { symbols } => {
            resolve::run(&settings, &symbols).await?;
        }
    }

    Ok(())
}
