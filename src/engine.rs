use crate::config::BacktestConfig;
use crate::data::BarSeries;
use crate::error::{EngineError, Result};
use crate::ledger::{OpenOutcome, PositionLedger};
use crate::models::{generate_run_id, BacktestResult, EntrySkip, EquityPoint, Signal};
use crate::performance::MetricsCalculator;
use crate::strategy::{create_strategy, Strategy};
use log::debug;
use std::time::Instant;

/// Replays one strategy over one bar series, in strict time order. The
/// engine is single-threaded by design: bar i is fully processed — signal,
/// lifecycle, entry, equity sample — before bar i+1 is touched, and signal
/// generation only ever sees bars up to and including the current index.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&self, series: &BarSeries) -> Result<BacktestResult> {
        self.run_with_deadline(series, None)
    }

    /// Run with an optional wall-clock deadline, checked once per bar. An
    /// expired deadline aborts this run only; batch layers record it as a
    /// failed combination.
    pub fn run_with_deadline(
        &self,
        series: &BarSeries,
        deadline: Option<Instant>,
    ) -> Result<BacktestResult> {
        self.config.validate()?;

        let bars = series.bars();
        if bars.is_empty() {
            return Err(EngineError::Data(format!(
                "no bars to simulate for {}/{}",
                series.symbol(),
                series.timeframe()
            )));
        }

        let strategy = create_strategy(&self.config.strategy, &self.config.parameters)?;
        let min_lookback = strategy.min_lookback();

        let run_id = generate_run_id(
            &self.config.symbol,
            &self.config.timeframe,
            bars[0].timestamp,
            bars[bars.len() - 1].timestamp,
        );
        let mut ledger = PositionLedger::new(&self.config, &run_id);
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
        let mut skipped_entries: Vec<EntrySkip> = Vec::new();
        let mut peak_equity = self.config.starting_balance;

        for (index, bar) in bars.iter().enumerate() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(EngineError::Deadline);
                }
            }

            let signal = if index >= min_lookback {
                strategy.signal_at(&bars[..=index], index)
            } else {
                Signal::neutral()
            };

            ledger.update(bar);

            if self.config.reversal_exit && !signal.is_neutral() {
                let closed = ledger.close_opposing(bar, signal.direction);
                if closed > 0 {
                    debug!(
                        "closed {} position(s) on reversal to {} at {}",
                        closed,
                        signal.direction.as_str(),
                        bar.timestamp
                    );
                }
            }

            if !signal.is_neutral() && (self.config.allow_pyramiding || !ledger.has_open()) {
                match ledger.open(bar, &signal) {
                    OpenOutcome::Opened(id) => {
                        debug!(
                            "opened position {} ({}) at {}",
                            id,
                            signal.direction.as_str(),
                            bar.timestamp
                        );
                    }
                    OpenOutcome::Rejected(reason) => {
                        debug!("entry at {} skipped: {}", bar.timestamp, reason);
                        skipped_entries.push(EntrySkip {
                            timestamp: bar.timestamp,
                            direction: signal.direction,
                            reason,
                        });
                    }
                }
            }

            let equity = ledger.equity();
            if equity > peak_equity {
                peak_equity = equity;
            }
            let drawdown_pct = if peak_equity > 0.0 {
                ((peak_equity - equity) / peak_equity * 100.0).max(0.0)
            } else {
                0.0
            };
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
                drawdown_pct,
            });
        }

        let last_bar = &bars[bars.len() - 1];
        ledger.force_close_all(last_bar);
        let final_equity = ledger.equity();

        // The last sample was taken before the forced close; replace it so
        // the curve ends on realized equity.
        if let Some(last_point) = equity_curve.last_mut() {
            if final_equity > peak_equity {
                peak_equity = final_equity;
            }
            last_point.equity = final_equity;
            last_point.drawdown_pct = if peak_equity > 0.0 {
                ((peak_equity - final_equity) / peak_equity * 100.0).max(0.0)
            } else {
                0.0
            };
        }

        let trades = ledger.into_closed_trades();
        let metrics = MetricsCalculator::compute(
            &trades,
            &equity_curve,
            self.config.annualization_factor,
        );

        Ok(BacktestResult {
            id: run_id,
            config: self.config.clone(),
            start_date: bars[0].timestamp,
            end_date: last_bar.timestamp,
            starting_balance: self.config.starting_balance,
            final_equity,
            trades,
            equity_curve,
            metrics,
            skipped_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::models::{Bar, ExitReason};
    use chrono::{Duration, TimeZone, Utc};

    fn trending_series(count: usize) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..count)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar {
                    timestamp: start + Duration::days(i as i64),
                    open: close - 0.5,
                    high: close + 0.5,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect();
        BarSeries::new("TREND", "D1", bars).unwrap()
    }

    fn trend_config() -> BacktestConfig {
        let mut config = BacktestConfig {
            symbol: "TREND".to_string(),
            start: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
            strategy: "ma_cross".to_string(),
            lifecycle: LifecycleConfig {
                stop_distance: 10.0,
                ..LifecycleConfig::default()
            },
            ..BacktestConfig::default()
        };
        config.parameters.insert("fastPeriod".to_string(), 5.0);
        config.parameters.insert("slowPeriod".to_string(), 20.0);
        config
    }

    #[test]
    fn uptrend_run_is_profitable_before_costs() {
        let engine = BacktestEngine::new(trend_config());
        let result = engine.run(&trending_series(100)).unwrap();

        assert!(!result.trades.is_empty());
        assert!(
            result.metrics.net_profit >= 0.0,
            "trend following an uptrend must not lose before costs (net {})",
            result.metrics.net_profit
        );
        assert_eq!(result.equity_curve.len(), 100);
        assert_eq!(
            result.trades.last().unwrap().exit_reason,
            ExitReason::EndOfData
        );
    }

    #[test]
    fn reruns_are_byte_identical() {
        let engine = BacktestEngine::new(trend_config());
        let series = trending_series(100);

        let first = serde_json::to_vec(&engine.run(&series).unwrap()).unwrap();
        let second = serde_json::to_vec(&engine.run(&series).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn expired_deadline_aborts_the_run() {
        let engine = BacktestEngine::new(trend_config());
        let result = engine
            .run_with_deadline(&trending_series(100), Some(Instant::now()));
        assert!(matches!(result, Err(EngineError::Deadline)));
    }

    #[test]
    fn invalid_config_fails_before_simulation() {
        let mut config = trend_config();
        config.risk_per_trade = 0.0;
        let engine = BacktestEngine::new(config);
        assert!(matches!(
            engine.run(&trending_series(50)),
            Err(EngineError::Configuration(_))
        ));
    }
}
