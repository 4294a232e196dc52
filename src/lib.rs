//! Offline strategy simulation: replay trading strategies over historical
//! OHLCV series, track positions through their lifecycle, score the results
//! and search parameter space for configurations that hold up out of sample.
//!
//! The layers compose bottom-up: [`data::BarSeries`] feeds a
//! [`strategy::Strategy`] inside a [`engine::BacktestEngine`], which owns a
//! [`ledger::PositionLedger`] and emits a [`models::BacktestResult`].
//! [`optimizer::ParameterOptimizer`] fans independent engine runs across a
//! worker pool, and [`walk_forward::WalkForwardValidator`] chains optimizer
//! and engine across rolling train/test windows.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod strategy;
pub mod trading_rules;
pub mod walk_forward;

pub use config::{BacktestConfig, LifecycleConfig, OptimizationMetric};
pub use data::{BarSeries, MarketDataSource, SliceDataSource};
pub use engine::BacktestEngine;
pub use error::{EngineError, Result};
pub use models::{
    BacktestResult, Bar, ClosedTrade, Direction, EquityPoint, ExitReason, MetricsSnapshot,
    OptimizationReport, OptimizationResult, ParameterBag, ParameterDomain, Signal,
    WalkForwardReport, WalkForwardWindow, WindowOutcome,
};
pub use optimizer::{OptimizerSettings, ParameterOptimizer, SearchMode};
pub use performance::MetricsCalculator;
pub use strategy::{create_strategy, Strategy};
pub use walk_forward::{WalkForwardConfig, WalkForwardValidator};
