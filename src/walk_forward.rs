use crate::config::BacktestConfig;
use crate::data::BarSeries;
use crate::engine::BacktestEngine;
use crate::error::{EngineError, Result};
use crate::models::{
    EquityPoint, ParameterDomain, WalkForwardReport, WalkForwardWindow, WindowOutcome,
    WindowResult,
};
use crate::optimizer::{ConstraintHook, OptimizerSettings, ParameterOptimizer};
use crate::performance::MetricsCalculator;
use crate::strategy::{create_strategy, Strategy};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::collections::BTreeMap;

/// Rolling window sizing, in days. Windows advance by `step_days` (the test
/// span when unset), so consecutive test ranges tile the date range without
/// overlap by default.
#[derive(Debug, Clone)]
pub struct WalkForwardConfig {
    pub train_days: i64,
    pub test_days: i64,
    pub step_days: Option<i64>,
}

impl WalkForwardConfig {
    pub fn new(train_days: i64, test_days: i64) -> Self {
        Self {
            train_days,
            test_days,
            step_days: None,
        }
    }

    /// Derive train/test day counts from a total window span and the
    /// fraction of it used for training.
    pub fn from_window_fraction(window_days: i64, train_fraction: f64) -> Result<Self> {
        if !train_fraction.is_finite() || train_fraction <= 0.0 || train_fraction >= 1.0 {
            return Err(EngineError::Configuration(format!(
                "train fraction must be inside (0, 1) (value: {})",
                train_fraction
            )));
        }
        let train_days = (window_days as f64 * train_fraction).round() as i64;
        let test_days = window_days - train_days;
        let config = Self::new(train_days, test_days);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_days < 1 || self.test_days < 1 {
            return Err(EngineError::Configuration(format!(
                "train ({}) and test ({}) spans must each cover at least one day",
                self.train_days, self.test_days
            )));
        }
        if let Some(step) = self.step_days {
            if step < 1 {
                return Err(EngineError::Configuration(format!(
                    "step must cover at least one day (value: {})",
                    step
                )));
            }
        }
        Ok(())
    }

    fn step(&self) -> i64 {
        self.step_days.unwrap_or(self.test_days)
    }
}

/// Compares out-of-sample performance against in-sample performance. Inputs
/// are the mean in-sample net profit of the winning combinations and the
/// combined out-of-sample net profit.
pub type RobustnessScore = Box<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Out-of-sample over in-sample net profit, 0 when the in-sample base is
/// negligible, clamped so near-zero denominators cannot blow the score up.
pub fn default_robustness_score(in_sample_net: f64, out_of_sample_net: f64) -> f64 {
    if !in_sample_net.is_finite() || in_sample_net.abs() < 1e-9 {
        return 0.0;
    }
    (out_of_sample_net / in_sample_net).clamp(-10.0, 10.0)
}

/// Chains optimizer and simulator across rolling train/test windows: each
/// window's winning parameters are scored on the adjacent, unseen test range
/// and the out-of-sample results are aggregated into one report. Guards the
/// optimizer against overfitting a single period.
pub struct WalkForwardValidator {
    base_config: BacktestConfig,
    space: BTreeMap<String, ParameterDomain>,
    optimizer_settings: OptimizerSettings,
    window_config: WalkForwardConfig,
    constraints: Vec<ConstraintHook>,
    scorer: RobustnessScore,
}

impl WalkForwardValidator {
    pub fn new(
        base_config: BacktestConfig,
        space: BTreeMap<String, ParameterDomain>,
        optimizer_settings: OptimizerSettings,
        window_config: WalkForwardConfig,
    ) -> Self {
        Self {
            base_config,
            space,
            optimizer_settings,
            window_config,
            constraints: Vec::new(),
            scorer: Box::new(default_robustness_score),
        }
    }

    pub fn with_constraint<F>(mut self, hook: F) -> Self
    where
        F: Fn(&crate::models::ParameterBag) -> bool + Send + Sync + 'static,
    {
        self.constraints.push(std::sync::Arc::new(hook));
        self
    }

    pub fn with_scorer<F>(mut self, scorer: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.scorer = Box::new(scorer);
        self
    }

    /// Rolling windows over `[start, end]`. A range too small for even one
    /// window is a configuration error, raised before any simulation.
    pub fn generate_windows(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WalkForwardWindow>> {
        self.window_config.validate()?;
        if end <= start {
            return Err(EngineError::Configuration(format!(
                "walk-forward range end {} must be after start {}",
                end, start
            )));
        }

        let train = self.window_config.train_days;
        let test = self.window_config.test_days;
        let mut windows = Vec::new();
        let mut train_start = start;

        loop {
            let train_end = train_start + Duration::days(train - 1);
            let test_start = train_start + Duration::days(train);
            let test_end = test_start + Duration::days(test - 1);
            if test_end > end {
                break;
            }
            windows.push(WalkForwardWindow {
                train_start,
                train_end,
                test_start,
                test_end,
            });
            train_start += Duration::days(self.window_config.step());
        }

        if windows.is_empty() {
            return Err(EngineError::Configuration(format!(
                "walk-forward window ({} train + {} test days) is larger than the available range {} to {}",
                train, test, start, end
            )));
        }
        Ok(windows)
    }

    pub fn run(&self, series: &BarSeries) -> Result<WalkForwardReport> {
        self.base_config.validate()?;
        let windows =
            self.generate_windows(series.first_timestamp(), series.last_timestamp())?;
        info!(
            "Walk-forward validation across {} window(s) of {}+{} days",
            windows.len(),
            self.window_config.train_days,
            self.window_config.test_days
        );

        // Lookback of the unoptimized strategy; per-window checks re-derive
        // it from the winning parameters before the test run.
        let base_lookback =
            create_strategy(&self.base_config.strategy, &self.base_config.parameters)?
                .min_lookback();

        let mut outcomes: Vec<WindowOutcome> = Vec::with_capacity(windows.len());
        let mut completed: Vec<WindowResult> = Vec::new();
        let mut rolling_balance = self.base_config.starting_balance;

        for window in windows {
            match self.run_window(series, window, base_lookback, rolling_balance)? {
                WindowOutcome::Completed(result) => {
                    rolling_balance = result.test_result.final_equity;
                    completed.push((*result).clone());
                    outcomes.push(WindowOutcome::Completed(result));
                }
                skipped => {
                    if let WindowOutcome::Skipped { reason, .. } = &skipped {
                        info!(
                            "Skipping window {} to {}: {}",
                            window.train_start, window.test_end, reason
                        );
                    }
                    outcomes.push(skipped);
                }
            }
        }

        let skipped_windows = outcomes.len() - completed.len();
        let report = self.aggregate(outcomes, &completed, skipped_windows);
        Ok(report)
    }

    fn run_window(
        &self,
        series: &BarSeries,
        window: WalkForwardWindow,
        base_lookback: usize,
        rolling_balance: f64,
    ) -> Result<WindowOutcome> {
        let skipped = |reason: String| WindowOutcome::Skipped { window, reason };

        let train_series = series.slice_range(window.train_start, window.train_end);
        if train_series.len() <= base_lookback {
            return Ok(skipped(format!(
                "train range holds {} bars, below the strategy lookback of {}",
                train_series.len(),
                base_lookback
            )));
        }

        let mut train_config = self.base_config.clone();
        train_config.start = window.train_start;
        train_config.end = window.train_end;
        let optimizer = ParameterOptimizer::new(
            train_config,
            self.space.clone(),
            self.optimizer_settings.clone(),
        )
        .with_constraint_hooks(self.constraints.clone());

        let train_report = match optimizer.run(&train_series) {
            Ok(report) => report,
            // Space/window misconfiguration would fail every window the same
            // way; surface it instead of recording N skips.
            Err(error @ EngineError::Configuration(_)) => return Err(error),
            Err(error) => {
                return Ok(skipped(format!("training optimization failed: {}", error)));
            }
        };
        let Some(best) = train_report.ranked.first() else {
            return Ok(skipped(
                "no parameter combination survived training".to_string(),
            ));
        };

        let mut test_config = self.base_config.clone();
        test_config.start = window.test_start;
        test_config.end = window.test_end;
        test_config.starting_balance = rolling_balance;
        for (key, value) in &best.parameters {
            test_config.parameters.insert(key.clone(), *value);
        }

        let test_lookback =
            match create_strategy(&test_config.strategy, &test_config.parameters) {
                Ok(strategy) => strategy.min_lookback(),
                Err(error) => {
                    return Ok(skipped(format!("winning parameters invalid: {}", error)));
                }
            };
        let test_series = series.slice_range(window.test_start, window.test_end);
        if test_series.len() <= test_lookback {
            return Ok(skipped(format!(
                "test range holds {} bars, below the strategy lookback of {}",
                test_series.len(),
                test_lookback
            )));
        }

        match BacktestEngine::new(test_config).run(&test_series) {
            Ok(test_result) => Ok(WindowOutcome::Completed(Box::new(WindowResult {
                window,
                parameters: best.parameters.clone(),
                train_score: best.score,
                train_net_profit: best.result.metrics.net_profit,
                test_result,
            }))),
            Err(error) => {
                warn!(
                    "Out-of-sample run failed for window {} to {}: {}",
                    window.test_start, window.test_end, error
                );
                Ok(skipped(format!("out-of-sample run failed: {}", error)))
            }
        }
    }

    fn aggregate(
        &self,
        outcomes: Vec<WindowOutcome>,
        completed: &[WindowResult],
        skipped_windows: usize,
    ) -> WalkForwardReport {
        let mut combined_trades = Vec::new();
        let mut combined_equity: Vec<EquityPoint> = Vec::new();
        for result in completed {
            combined_trades.extend(result.test_result.trades.iter().cloned());
            combined_equity.extend(result.test_result.equity_curve.iter().cloned());
        }
        combined_trades.sort_by_key(|trade| trade.exit_time);

        // Each test run starts from the previous window's final equity, so
        // the stitched curve is continuous; drawdowns are re-based on the
        // combined peak.
        let mut peak = f64::NEG_INFINITY;
        for point in combined_equity.iter_mut() {
            if point.equity > peak {
                peak = point.equity;
            }
            point.drawdown_pct = if peak > 0.0 {
                ((peak - point.equity) / peak * 100.0).max(0.0)
            } else {
                0.0
            };
        }

        let combined_metrics = MetricsCalculator::compute(
            &combined_trades,
            &combined_equity,
            self.base_config.annualization_factor,
        );

        let mean_in_sample_net = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|r| r.train_net_profit).sum::<f64>() / completed.len() as f64
        };
        let robustness_score = (self.scorer)(mean_in_sample_net, combined_metrics.net_profit);

        WalkForwardReport {
            completed_windows: completed.len(),
            skipped_windows,
            windows: outcomes,
            combined_trades,
            combined_equity,
            combined_metrics,
            robustness_score,
        }
    }
}
