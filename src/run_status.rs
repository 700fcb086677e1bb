use anyhow::Result;
use std::sync::{Arc, Mutex};

/// Receives one notification per input signal, before the signal is
/// processed. Errors are logged by the engine and never abort a run.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, current: usize, total: usize, symbol: &str) -> Result<()>;
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) -> Result<()> + Send + Sync,
{
    fn on_progress(&self, current: usize, total: usize, symbol: &str) -> Result<()> {
        self(current, total, symbol)
    }
}

/// Shared, pollable view of a running backtest.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_signals: usize,
    current_signal: usize,
    current_symbol: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_signals: usize,
    pub current_signal: usize,
    pub current_symbol: Option<String>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_signals: data.total_signals,
                current_signal: data.current_signal,
                current_symbol: data.current_symbol.clone(),
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_signals: 0,
                current_signal: 0,
                current_symbol: None,
            }
        }
    }
}

impl ProgressSink for RunStatus {
    fn on_progress(&self, current: usize, total: usize, symbol: &str) -> Result<()> {
        if let Ok(mut data) = self.inner.lock() {
            data.current_signal = data.current_signal.max(current);
            data.total_signals = total;
            data.current_symbol = Some(symbol.to_string());
        }
        Ok(())
    }
}
