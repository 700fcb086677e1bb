use crate::models::{round2, BacktestReport, HorizonStats, SignalResult};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub struct ReportAggregator;

impl ReportAggregator {
    /// Reduces per-signal results into the final report.
    ///
    /// Statistics only ever look at successful signals that have a return for
    /// the horizon in question; a horizon nobody reached gets no entry.
    pub fn aggregate(
        results: Vec<SignalResult>,
        skipped_signals: usize,
        horizons: &[u32],
        ranking_horizon: u32,
    ) -> BacktestReport {
        let successful: Vec<&SignalResult> = results
            .iter()
            .filter(|result| result.status.is_success())
            .collect();

        let horizon_stats = horizons
            .iter()
            .filter_map(|horizon| {
                Self::horizon_stats(&successful, *horizon).map(|stats| (*horizon, stats))
            })
            .collect::<BTreeMap<_, _>>();

        let best_performer = Self::best_at(&successful, ranking_horizon).cloned();
        let worst_performer = Self::worst_at(&successful, ranking_horizon).cloned();

        let total_signals = results.len();
        let successful_signals = successful.len();

        BacktestReport {
            total_signals,
            successful_signals,
            failed_signals: total_signals - successful_signals,
            skipped_signals,
            ranking_horizon,
            horizon_stats,
            best_performer,
            worst_performer,
            trades: results,
        }
    }

    fn horizon_stats(successful: &[&SignalResult], horizon: u32) -> Option<HorizonStats> {
        let returns: Vec<f64> = successful
            .iter()
            .filter_map(|result| result.return_for(horizon))
            .filter(|value| value.is_finite())
            .collect();

        if returns.is_empty() {
            return None;
        }

        let winners = returns.iter().filter(|value| **value > 0.0).count();
        let win_rate = (winners as f64 / returns.len() as f64) * 100.0;

        Some(HorizonStats {
            avg_return: round2(returns.iter().mean()),
            win_rate: round2(win_rate),
            sample_size: returns.len(),
        })
    }

    /// Highest return at `horizon`; the earliest signal wins ties. Signals
    /// without that horizon never qualify.
    fn best_at<'a>(successful: &[&'a SignalResult], horizon: u32) -> Option<&'a SignalResult> {
        let mut best: Option<(&SignalResult, f64)> = None;
        for result in successful.iter().copied() {
            let Some(value) = result
                .return_for(horizon)
                .filter(|value| value.is_finite())
            else {
                continue;
            };
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((result, value)),
            }
        }
        best.map(|(result, _)| result)
    }

    /// Lowest return at `horizon`; the earliest signal wins ties.
    fn worst_at<'a>(successful: &[&'a SignalResult], horizon: u32) -> Option<&'a SignalResult> {
        let mut worst: Option<(&SignalResult, f64)> = None;
        for result in successful.iter().copied() {
            let Some(value) = result
                .return_for(horizon)
                .filter(|value| value.is_finite())
            else {
                continue;
            };
            match worst {
                Some((_, current)) if value >= current => {}
                _ => worst = Some((result, value)),
            }
        }
        worst.map(|(result, _)| result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HorizonOutcome, SignalStatus};
    use chrono::NaiveDate;

    fn success(symbol: &str, returns: &[(u32, f64)]) -> SignalResult {
        let date = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let mut result = SignalResult::failed(symbol, "2023-01-02", SignalStatus::Success);
        result.entry_price = 100.0;
        result.entry_date = Some(date);
        for (horizon, value) in returns {
            result.horizons.insert(
                *horizon,
                HorizonOutcome {
                    return_pct: *value,
                    exit_price: 100.0 + value,
                    exit_date: date,
                },
            );
        }
        result
    }

    #[test]
    fn averages_only_successful_non_null_returns() {
        let results = vec![
            success("A.NS", &[(7, 10.0), (30, 4.0)]),
            success("B.NS", &[(7, -2.0)]),
            SignalResult::failed("FAKESYMBOL", "2023-01-02", SignalStatus::SymbolNotFound),
            success("C.NS", &[(7, 1.0), (30, -1.0)]),
        ];

        let report = ReportAggregator::aggregate(results, 0, &[7, 30, 90], 30);

        assert_eq!(report.total_signals, 4);
        assert_eq!(report.successful_signals, 3);
        assert_eq!(report.failed_signals, 1);

        let seven = report.stats_for(7).unwrap();
        assert_eq!(seven.avg_return, 3.0);
        assert_eq!(seven.win_rate, 66.67);
        assert_eq!(seven.sample_size, 3);

        let thirty = report.stats_for(30).unwrap();
        assert_eq!(thirty.avg_return, 1.5);
        assert_eq!(thirty.win_rate, 50.0);

        assert!(report.stats_for(90).is_none());
    }

    #[test]
    fn ranking_ignores_signals_without_the_ranking_horizon() {
        let results = vec![
            success("A.NS", &[(7, 50.0)]),
            success("B.NS", &[(30, 5.0)]),
            success("C.NS", &[(30, -3.0)]),
        ];

        let report = ReportAggregator::aggregate(results, 0, &[7, 30], 30);

        assert_eq!(report.best_performer.unwrap().symbol, "B.NS");
        assert_eq!(report.worst_performer.unwrap().symbol, "C.NS");
    }

    #[test]
    fn ranking_ties_go_to_the_earliest_signal() {
        let results = vec![
            success("A.NS", &[(30, 2.0)]),
            success("B.NS", &[(30, 2.0)]),
        ];

        let report = ReportAggregator::aggregate(results, 0, &[30], 30);

        assert_eq!(report.best_performer.unwrap().symbol, "A.NS");
        assert_eq!(report.worst_performer.unwrap().symbol, "A.NS");
    }

    #[test]
    fn no_ranking_when_horizon_missing_everywhere() {
        let results = vec![success("A.NS", &[(7, 1.0)])];
        let report = ReportAggregator::aggregate(results, 2, &[7, 30], 30);

        assert!(report.best_performer.is_none());
        assert!(report.worst_performer.is_none());
        assert_eq!(report.skipped_signals, 2);
        assert_eq!(report.total_signals, 1);
    }

    #[test]
    fn non_finite_returns_never_rank() {
        let results = vec![
            success("A.NS", &[(30, 4.0)]),
            success("B.NS", &[(30, f64::NAN)]),
            success("C.NS", &[(30, 1.0)]),
            success("D.NS", &[(30, f64::INFINITY)]),
        ];

        let report = ReportAggregator::aggregate(results, 0, &[30], 30);

        assert_eq!(report.best_performer.as_ref().unwrap().symbol, "A.NS");
        assert_eq!(report.worst_performer.as_ref().unwrap().symbol, "C.NS");
        assert_eq!(report.stats_for(30).unwrap().sample_size, 2);
    }

    #[test]
    fn empty_input_produces_empty_report() {
        let report = ReportAggregator::aggregate(Vec::new(), 0, &[7], 30);
        assert_eq!(report.total_signals, 0);
        assert_eq!(report.failed_signals, 0);
        assert!(report.horizon_stats.is_empty());
        assert!(report.trades.is_empty());
    }
}
