use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Once;
use std::time::Duration as StdDuration;
use stratsim::config::LifecycleConfig;
use stratsim::strategy::{create_strategy, Strategy};
use stratsim::{
    BacktestConfig, BacktestEngine, Bar, BarSeries, Direction, EngineError, MarketDataSource,
    OptimizationMetric, OptimizerSettings, ParameterDomain, ParameterOptimizer, SearchMode,
    SliceDataSource, WalkForwardConfig, WalkForwardValidator, WindowOutcome,
};

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap()
}

fn trending_series(count: usize) -> BarSeries {
    let bars: Vec<Bar> = (0..count)
        .map(|i| {
            let close = 100.0 + i as f64;
            Bar {
                timestamp: series_start() + Duration::days(i as i64),
                open: close - 0.5,
                high: close + 0.5,
                low: close - 1.0,
                close,
                volume: 10_000.0,
            }
        })
        .collect();
    BarSeries::new("TREND", "D1", bars).expect("valid synthetic series")
}

fn wavy_series(count: usize) -> BarSeries {
    let bars: Vec<Bar> = (0..count)
        .map(|i| {
            let phase = i as f64 / 11.0;
            let close = 120.0 + 9.0 * phase.sin() + i as f64 * 0.04;
            Bar {
                timestamp: series_start() + Duration::days(i as i64),
                open: close - 0.4,
                high: close + 0.9,
                low: close - 0.9,
                close,
                volume: 10_000.0,
            }
        })
        .collect();
    BarSeries::new("WAVE", "D1", bars).expect("valid synthetic series")
}

fn base_config(symbol: &str) -> BacktestConfig {
    let mut config = BacktestConfig {
        symbol: symbol.to_string(),
        timeframe: "D1".to_string(),
        start: series_start(),
        end: series_start() + Duration::days(400),
        starting_balance: 10_000.0,
        risk_per_trade: 0.02,
        lot_step: 0.01,
        commission: 0.0,
        spread: 0.0,
        strategy: "ma_cross".to_string(),
        lifecycle: LifecycleConfig {
            stop_distance: 8.0,
            breakeven_activation: 4.0,
            breakeven_buffer: 0.2,
            trailing_activation: 8.0,
            trailing_step: 1.0,
            trailing_distance: 5.0,
            ..LifecycleConfig::default()
        },
        ..BacktestConfig::default()
    };
    config.parameters.insert("fastPeriod".to_string(), 5.0);
    config.parameters.insert("slowPeriod".to_string(), 20.0);
    config
}

#[test]
fn trending_market_end_to_end() -> Result<()> {
    ensure_test_env();
    let series = trending_series(100);
    let engine = BacktestEngine::new(base_config("TREND"));
    let result = engine.run(&series)?;

    // A 5/20 cross on strictly rising closes must go long and never short.
    assert!(!result.trades.is_empty(), "expected at least one trade");
    assert!(result
        .trades
        .iter()
        .all(|trade| trade.direction == Direction::Buy));
    assert!(
        result.metrics.net_profit >= 0.0,
        "uptrend trades must not lose before costs (net {})",
        result.metrics.net_profit
    );

    assert_eq!(result.equity_curve.len(), series.len());
    assert!(result.metrics.max_drawdown_pct >= 0.0);
    assert!(result.metrics.max_drawdown_pct <= 100.0);

    // Exported results round-trip through the interchange format.
    let json = serde_json::to_string(&result)?;
    let restored: stratsim::BacktestResult = serde_json::from_str(&json)?;
    assert_eq!(restored.trades.len(), result.trades.len());
    assert_eq!(restored.id, result.id);
    Ok(())
}

#[test]
fn position_size_follows_the_risk_rule() -> Result<()> {
    ensure_test_env();
    // 2% of 10,000 over a 50-unit stop must buy exactly 4.0 units.
    let mut config = base_config("TREND");
    config.lifecycle.stop_distance = 50.0;
    config.lifecycle.breakeven_activation = 0.0;
    config.lifecycle.trailing_activation = 0.0;

    let result = BacktestEngine::new(config).run(&trending_series(60))?;
    let first = result
        .trades
        .first()
        .ok_or_else(|| anyhow!("no trade produced"))?;
    assert!(
        (first.volume - 4.0).abs() < 1e-9,
        "expected volume 4.0, got {}",
        first.volume
    );
    Ok(())
}

#[test]
fn signals_only_depend_on_past_bars() -> Result<()> {
    ensure_test_env();
    let series = wavy_series(100);
    let config = base_config("WAVE");
    let strategy = create_strategy(&config.strategy, &config.parameters)
        .map_err(|e| anyhow!(e.to_string()))?;

    // Truncating the future must not change any already-emitted signal.
    let full = strategy.generate_signals(series.bars());
    let prefix = strategy.generate_signals(&series.bars()[..70]);
    assert_eq!(&full[..70], &prefix[..]);
    Ok(())
}

#[test]
fn reruns_are_reproducible_across_engines() -> Result<()> {
    ensure_test_env();
    let series = wavy_series(150);
    let config = base_config("WAVE");

    let first = BacktestEngine::new(config.clone()).run(&series)?;
    let second = BacktestEngine::new(config).run(&series)?;
    assert_eq!(
        serde_json::to_vec(&first)?,
        serde_json::to_vec(&second)?,
        "independent runs over identical inputs must be byte-identical"
    );
    Ok(())
}

#[test]
fn grid_search_ranks_every_combination() -> Result<()> {
    ensure_test_env();
    let mut space = BTreeMap::new();
    space.insert(
        "fastPeriod".to_string(),
        ParameterDomain::Values(vec![3.0, 5.0, 7.0, 9.0]),
    );
    space.insert(
        "slowPeriod".to_string(),
        ParameterDomain::Range {
            min: 15.0,
            max: 35.0,
            step: 5.0,
        },
    );

    let optimizer = ParameterOptimizer::new(
        base_config("WAVE"),
        space,
        OptimizerSettings {
            metric: OptimizationMetric::NetProfit,
            per_run_timeout: Some(StdDuration::from_secs(30)),
            ..OptimizerSettings::default()
        },
    );
    let report = optimizer.run(&wavy_series(250))?;

    // A 4x5 grid runs exactly 20 independent simulations.
    assert_eq!(report.evaluated, 20);
    assert_eq!(report.ranked.len() + report.failures.len(), 20);
    for pair in report.ranked.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // Stored results re-score under a different metric with no extra
    // simulation state.
    for entry in &report.ranked {
        let rescored = OptimizationMetric::SharpeRatio.score(&entry.result.metrics);
        assert!(!rescored.is_nan());
    }
    Ok(())
}

#[test]
fn random_search_draws_without_replacement() -> Result<()> {
    ensure_test_env();
    let mut space = BTreeMap::new();
    space.insert(
        "fastPeriod".to_string(),
        ParameterDomain::Range {
            min: 3.0,
            max: 10.0,
            step: 1.0,
        },
    );
    space.insert(
        "slowPeriod".to_string(),
        ParameterDomain::Values(vec![20.0, 30.0]),
    );

    let optimizer = ParameterOptimizer::new(
        base_config("WAVE"),
        space,
        OptimizerSettings {
            mode: SearchMode::Random {
                samples: 5,
                seed: 99,
            },
            ..OptimizerSettings::default()
        },
    );
    let report = optimizer.run(&wavy_series(150))?;
    assert_eq!(report.evaluated, 5);

    let mut signatures: Vec<String> = report
        .ranked
        .iter()
        .map(|entry| format!("{:?}", {
            let mut sorted: Vec<_> = entry.parameters.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            sorted
        }))
        .collect();
    signatures.sort();
    signatures.dedup();
    assert_eq!(signatures.len(), report.ranked.len());
    Ok(())
}

#[test]
fn walk_forward_validates_out_of_sample() -> Result<()> {
    ensure_test_env();
    let mut space = BTreeMap::new();
    space.insert(
        "fastPeriod".to_string(),
        ParameterDomain::Values(vec![3.0, 5.0]),
    );
    space.insert(
        "slowPeriod".to_string(),
        ParameterDomain::Values(vec![15.0, 25.0]),
    );

    let validator = WalkForwardValidator::new(
        base_config("WAVE"),
        space,
        OptimizerSettings::default(),
        WalkForwardConfig::new(90, 45),
    )
    .with_constraint(|params| params["fastPeriod"] < params["slowPeriod"]);
    let report = validator.run(&wavy_series(320))?;

    assert!(report.completed_windows > 0);
    assert_eq!(
        report.completed_windows + report.skipped_windows,
        report.windows.len()
    );

    for outcome in &report.windows {
        if let WindowOutcome::Completed(result) = outcome {
            // The winning parameters were fit strictly before the test range.
            assert!(result.window.train_end < result.window.test_start);
            assert!(result.test_result.start_date >= result.window.test_start);
            assert!(result.test_result.end_date <= result.window.test_end);
        }
    }

    assert!(report.robustness_score.is_finite());
    assert!((-10.0..=10.0).contains(&report.robustness_score));

    let json = serde_json::to_string(&report)?;
    assert!(json.contains("robustnessScore"));
    Ok(())
}

#[test]
fn data_source_feeds_the_engine() -> Result<()> {
    ensure_test_env();
    let source = SliceDataSource::new(vec![wavy_series(200)]);
    let start = series_start() + Duration::days(20);
    let end = series_start() + Duration::days(150);

    let series = source
        .fetch("WAVE", "D1", start, end)
        .map_err(|e| anyhow!(e.to_string()))?;
    assert_eq!(series.len(), 131);

    let mut config = base_config("WAVE");
    config.start = start;
    config.end = end;
    let result = BacktestEngine::new(config).run(&series)?;
    assert_eq!(result.start_date, start);
    assert_eq!(result.end_date, end);
    Ok(())
}

#[test]
fn batch_failures_never_abort_siblings() -> Result<()> {
    ensure_test_env();
    let mut space = BTreeMap::new();
    // 40/20 is degenerate for a cross strategy and must fail in isolation.
    space.insert(
        "fastPeriod".to_string(),
        ParameterDomain::Values(vec![5.0, 40.0]),
    );
    space.insert(
        "slowPeriod".to_string(),
        ParameterDomain::Values(vec![20.0]),
    );

    let report = ParameterOptimizer::new(
        base_config("WAVE"),
        space,
        OptimizerSettings::default(),
    )
    .run(&wavy_series(120))?;

    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.contains("fast period"));
    Ok(())
}

#[test]
fn configuration_errors_surface_before_simulation() {
    ensure_test_env();
    let empty_space: BTreeMap<String, ParameterDomain> = BTreeMap::new();
    let optimizer = ParameterOptimizer::new(
        base_config("WAVE"),
        empty_space,
        OptimizerSettings::default(),
    );
    assert!(matches!(
        optimizer.run(&wavy_series(60)),
        Err(EngineError::Configuration(_))
    ));
}
