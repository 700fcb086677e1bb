pub mod backtester;
pub mod cache;
pub mod commands;
pub mod calendar;
pub mod config;
pub mod models;
pub mod price_source;
pub mod report;
pub mod resolver;
pub(crate) mod retry;
pub mod run_status;
pub mod yahoo;
