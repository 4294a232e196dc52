use crate::config::{BacktestConfig, OptimizationMetric};
use crate::data::BarSeries;
use crate::engine::BacktestEngine;
use crate::error::{EngineError, Result};
use crate::models::{
    OptimizationFailure, OptimizationReport, OptimizationResult, ParameterBag, ParameterDomain,
};
use crate::param_utils::{cartesian_product, parameter_signature, sample_without_replacement};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How the parameter space is enumerated.
#[derive(Debug, Clone, Copy)]
pub enum SearchMode {
    /// Full Cartesian product.
    Grid,
    /// Uniform draws without replacement from the grid, reproducible for a
    /// given seed.
    Random { samples: usize, seed: u64 },
}

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub metric: OptimizationMetric,
    pub mode: SearchMode,
    /// Wall-clock budget per combination; an overrun marks that run failed.
    pub per_run_timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            metric: OptimizationMetric::NetProfit,
            mode: SearchMode::Grid,
            per_run_timeout: None,
            show_progress: false,
        }
    }
}

/// Returns false for combinations that should be rejected before any
/// simulation runs (e.g. fast period >= slow period). Shared so the
/// walk-forward validator can reuse one hook set across windows.
pub type ConstraintHook = Arc<dyn Fn(&ParameterBag) -> bool + Send + Sync>;

struct OptimizationTask {
    id: usize,
    parameters: ParameterBag,
}

struct TaskOutcome {
    parameters: ParameterBag,
    run: std::result::Result<OptimizationResult, String>,
}

/// Searches a parameter space by running one independent backtest per
/// combination across a worker pool. Workers share only the read-only bar
/// series; each owns a fresh engine, ledger and strategy, so one worker's
/// failure never touches its siblings.
pub struct ParameterOptimizer {
    base_config: BacktestConfig,
    space: BTreeMap<String, ParameterDomain>,
    settings: OptimizerSettings,
    constraints: Vec<ConstraintHook>,
}

impl ParameterOptimizer {
    pub fn new(
        base_config: BacktestConfig,
        space: BTreeMap<String, ParameterDomain>,
        settings: OptimizerSettings,
    ) -> Self {
        Self {
            base_config,
            space,
            settings,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ParameterBag) -> bool + Send + Sync + 'static,
    {
        self.constraints.push(Arc::new(hook));
        self
    }

    pub fn with_constraint_hooks(mut self, hooks: Vec<ConstraintHook>) -> Self {
        self.constraints.extend(hooks);
        self
    }

    /// Enumerate, filter, evaluate and rank. Configuration problems (empty
    /// space, nothing left after constraints) surface before any simulation.
    pub fn run(&self, series: &BarSeries) -> Result<OptimizationReport> {
        self.base_config.validate()?;

        let mut combinations = cartesian_product(&self.space)?;
        let enumerated = combinations.len();
        combinations.retain(|combination| self.constraints.iter().all(|hook| hook(combination)));
        let rejected = enumerated - combinations.len();
        if rejected > 0 {
            info!(
                "Constraint hooks rejected {} of {} combinations",
                rejected, enumerated
            );
        }

        if let SearchMode::Random { samples, seed } = self.settings.mode {
            if samples == 0 {
                return Err(EngineError::Configuration(
                    "random search sample count must be positive".into(),
                ));
            }
            combinations = sample_without_replacement(combinations, samples, seed);
        }

        if combinations.is_empty() {
            return Err(EngineError::Configuration(
                "no parameter combinations left to evaluate".into(),
            ));
        }

        let outcomes = self.evaluate_batch(series, combinations)?;

        let mut ranked = Vec::new();
        let mut failures = Vec::new();
        let mut evaluated = 0usize;
        for outcome in outcomes {
            evaluated += 1;
            match outcome.run {
                Ok(result) => ranked.push(result),
                Err(error) => failures.push(OptimizationFailure {
                    parameters: outcome.parameters,
                    error,
                }),
            }
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.result
                        .metrics
                        .total_trades
                        .cmp(&b.result.metrics.total_trades)
                })
                .then_with(|| {
                    parameter_signature(&a.parameters).cmp(&parameter_signature(&b.parameters))
                })
        });
        failures.sort_by_key(|failure| parameter_signature(&failure.parameters));

        if !failures.is_empty() {
            warn!(
                "Optimization completed with {} failed combination(s)",
                failures.len()
            );
        }

        Ok(OptimizationReport {
            metric: self.settings.metric.label().to_string(),
            ranked,
            failures,
            evaluated,
        })
    }

    fn evaluate_batch(
        &self,
        series: &BarSeries,
        combinations: Vec<ParameterBag>,
    ) -> Result<Vec<TaskOutcome>> {
        let total = combinations.len();
        info!(
            "Running {} backtests ranked by {}...",
            total,
            self.settings.metric.label()
        );

        let num_workers = std::cmp::min(total, std::cmp::max(1, num_cpus::get()));
        debug!("Using {} worker threads", num_workers);

        let (task_tx, task_rx): (Sender<OptimizationTask>, Receiver<OptimizationTask>) =
            bounded(total);
        let (result_tx, result_rx): (Sender<TaskOutcome>, Receiver<TaskOutcome>) = bounded(total);

        let mut handles = Vec::new();
        for _ in 0..num_workers {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let series = series.clone();
            let base_config = self.base_config.clone();
            let metric = self.settings.metric;
            let timeout = self.settings.per_run_timeout;

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let task_id = task.id;
                    let started = Instant::now();
                    let outcome = run_single_combination(&base_config, &series, task, metric, timeout);
                    match &outcome.run {
                        Ok(result) => debug!(
                            "Worker finished combination {} in {:.1}s (score {:.4})",
                            task_id,
                            started.elapsed().as_secs_f64(),
                            result.score
                        ),
                        Err(error) => warn!(
                            "Combination {} failed after {:.1}s: {}",
                            task_id,
                            started.elapsed().as_secs_f64(),
                            error
                        ),
                    }
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(task_rx);
        drop(result_tx);

        for (id, parameters) in combinations.into_iter().enumerate() {
            task_tx
                .send(OptimizationTask { id, parameters })
                .map_err(|_| {
                    EngineError::Configuration("optimizer task channel closed early".into())
                })?;
        }
        drop(task_tx);

        let progress = if self.settings.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut outcomes = Vec::with_capacity(total);
        while outcomes.len() < total {
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    progress.set_position(outcomes.len() as u64);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly; some results may be lost.");
                    break;
                }
            }
        }
        progress.finish_and_clear();

        for handle in handles {
            let _ = handle.join();
        }
        Ok(outcomes)
    }
}

/// One fully self-contained evaluation: own config, own engine, own ledger.
/// Panics and engine errors both degrade to a failure record.
fn run_single_combination(
    base_config: &BacktestConfig,
    series: &BarSeries,
    task: OptimizationTask,
    metric: OptimizationMetric,
    timeout: Option<Duration>,
) -> TaskOutcome {
    let mut config = base_config.clone();
    for (key, value) in &task.parameters {
        config.parameters.insert(key.clone(), *value);
    }

    let deadline = timeout.map(|budget| Instant::now() + budget);
    let run = catch_unwind(AssertUnwindSafe(|| {
        BacktestEngine::new(config).run_with_deadline(series, deadline)
    }));

    let run = match run {
        Ok(Ok(result)) => Ok(OptimizationResult {
            score: metric.score(&result.metrics),
            parameters: task.parameters.clone(),
            result,
        }),
        Ok(Err(error)) => Err(error.to_string()),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            Err(format!("worker panicked: {}", detail))
        }
    };

    TaskOutcome {
        parameters: task.parameters,
        run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::models::Bar;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn wavy_series(count: usize) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..count)
            .map(|i| {
                let phase = i as f64 / 12.0;
                let close = 100.0 + 8.0 * phase.sin() + i as f64 * 0.05;
                Bar {
                    timestamp: start + ChronoDuration::days(i as i64),
                    open: close - 0.3,
                    high: close + 0.8,
                    low: close - 0.8,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect();
        BarSeries::new("WAVE", "D1", bars).unwrap()
    }

    fn base_config() -> BacktestConfig {
        BacktestConfig {
            symbol: "WAVE".to_string(),
            start: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
            strategy: "ma_cross".to_string(),
            lifecycle: LifecycleConfig {
                stop_distance: 5.0,
                ..LifecycleConfig::default()
            },
            ..BacktestConfig::default()
        }
    }

    fn two_parameter_space() -> BTreeMap<String, ParameterDomain> {
        let mut space = BTreeMap::new();
        space.insert(
            "fastPeriod".to_string(),
            ParameterDomain::Values(vec![3.0, 5.0, 8.0, 10.0]),
        );
        space.insert(
            "slowPeriod".to_string(),
            ParameterDomain::Range {
                min: 15.0,
                max: 35.0,
                step: 5.0,
            },
        );
        space
    }

    #[test]
    fn grid_of_twenty_yields_twenty_ranked_entries() {
        let optimizer = ParameterOptimizer::new(
            base_config(),
            two_parameter_space(),
            OptimizerSettings::default(),
        );
        let report = optimizer.run(&wavy_series(200)).unwrap();

        assert_eq!(report.evaluated, 20);
        assert_eq!(report.ranked.len() + report.failures.len(), 20);
        assert!(report.failures.is_empty());

        for pair in report.ranked.windows(2) {
            assert!(
                pair[0].score >= pair[1].score,
                "ranking must be descending by score"
            );
        }
    }

    #[test]
    fn tie_break_prefers_fewer_trades() {
        let optimizer = ParameterOptimizer::new(
            base_config(),
            two_parameter_space(),
            OptimizerSettings::default(),
        );
        let report = optimizer.run(&wavy_series(200)).unwrap();
        for pair in report.ranked.windows(2) {
            if pair[0].score == pair[1].score {
                assert!(
                    pair[0].result.metrics.total_trades
                        <= pair[1].result.metrics.total_trades
                );
            }
        }
    }

    #[test]
    fn degenerate_combination_becomes_failure_record() {
        let mut space = BTreeMap::new();
        space.insert(
            "fastPeriod".to_string(),
            ParameterDomain::Values(vec![5.0, 40.0]),
        );
        space.insert(
            "slowPeriod".to_string(),
            ParameterDomain::Values(vec![20.0]),
        );

        let optimizer =
            ParameterOptimizer::new(base_config(), space, OptimizerSettings::default());
        let report = optimizer.run(&wavy_series(120)).unwrap();

        assert_eq!(report.ranked.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].parameters["fastPeriod"], 40.0);
    }

    #[test]
    fn constraint_hook_prunes_before_running() {
        let optimizer = ParameterOptimizer::new(
            base_config(),
            two_parameter_space(),
            OptimizerSettings::default(),
        )
        .with_constraint(|params| params["fastPeriod"] * 3.0 < params["slowPeriod"]);
        let report = optimizer.run(&wavy_series(120)).unwrap();

        assert!(report.evaluated < 20);
        assert!(report
            .ranked
            .iter()
            .all(|entry| entry.parameters["fastPeriod"] * 3.0 < entry.parameters["slowPeriod"]));
    }

    #[test]
    fn constraints_that_reject_everything_are_a_configuration_error() {
        let optimizer = ParameterOptimizer::new(
            base_config(),
            two_parameter_space(),
            OptimizerSettings::default(),
        )
        .with_constraint(|_| false);
        assert!(matches!(
            optimizer.run(&wavy_series(120)),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn random_search_is_bounded_and_reproducible() {
        let settings = || OptimizerSettings {
            mode: SearchMode::Random {
                samples: 6,
                seed: 11,
            },
            ..OptimizerSettings::default()
        };
        let first = ParameterOptimizer::new(base_config(), two_parameter_space(), settings())
            .run(&wavy_series(150))
            .unwrap();
        let second = ParameterOptimizer::new(base_config(), two_parameter_space(), settings())
            .run(&wavy_series(150))
            .unwrap();

        assert_eq!(first.evaluated, 6);
        let first_params: Vec<String> =
            first.ranked.iter().map(|r| parameter_signature(&r.parameters)).collect();
        let second_params: Vec<String> =
            second.ranked.iter().map(|r| parameter_signature(&r.parameters)).collect();
        assert_eq!(first_params, second_params);
    }
}
