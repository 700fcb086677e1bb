pub mod backtest;
pub mod resolve;
