use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat strategy parameter bag: name to primitive value. Ordered, so merged
/// combinations and serialized results come out deterministic.
pub type ParameterBag = BTreeMap<String, f64>;

/// One OHLCV candle for a fixed timeframe. Immutable once produced by a
/// data source; series are ordered ascending by timestamp with no duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
            Direction::Neutral => "neutral",
        }
    }

    /// +1 for long exposure, -1 for short, 0 for neutral.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    pub fn opposes(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Buy, Direction::Sell) | (Direction::Sell, Direction::Buy)
        )
    }
}

/// A directional suggestion for one bar. Consumed immediately by the ledger,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub direction: Direction,
    /// Confidence in 0..=1.
    pub strength: f64,
    /// Suggested stop-loss distance in price units; the configured default
    /// applies when absent.
    pub stop_distance: Option<f64>,
    /// Suggested take-profit distance in price units.
    pub target_distance: Option<f64>,
}

impl Signal {
    pub fn neutral() -> Self {
        Self {
            direction: Direction::Neutral,
            strength: 0.0,
            stop_distance: None,
            target_distance: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.direction == Direction::Neutral
    }
}

/// Lifecycle stage of a simulated position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStage {
    Initial,
    Breakeven,
    Trailing,
    Exited,
}

/// A simulated open trade. Mutated only by the ledger that owns it.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub original_volume: f64,
    pub open_price: f64,
    pub open_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    pub stage: PositionStage,
    pub unrealized_profit: f64,
    /// Price at the last trailing-stop advance, used for step accounting.
    pub trail_anchor: f64,
    pub bars_held: usize,
    pub partial_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Reversal,
    PartialClose,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Reversal => "reversal",
            ExitReason::PartialClose => "partial_close",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

/// Immutable record of a finished (fully or partially closed) position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub id: String,
    pub position_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    /// Realized profit net of commission.
    pub profit: f64,
    pub bars_held: usize,
    pub exit_reason: ExitReason,
}

/// One equity-curve sample, recorded per bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    /// Percentage drop from the running equity peak, in 0..=100.
    pub drawdown_pct: f64,
}

/// An entry signal the ledger declined, kept for run diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySkip {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub reason: String,
}

/// Fixed set of performance metrics, computable from a finished run's trade
/// list and equity curve alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub net_profit: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// Gross profit / gross loss; +inf when there is profit and no loss,
    /// 0 when there are neither winners nor losers.
    #[serde(with = "float_infinite_as_null")]
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Winning trades / total trades, 0 with no trades.
    pub win_rate: f64,
    /// Largest peak-to-trough percentage drop of the equity curve, 0..=100.
    pub max_drawdown_pct: f64,
    /// Mean bar-to-bar return over its standard deviation, annualized by the
    /// configured factor.
    pub sharpe_ratio: f64,
    pub avg_trade: f64,
    pub longest_win_streak: usize,
    pub longest_loss_streak: usize,
}

/// Everything one simulation run produced. Immutable after completion and
/// serializable for downstream report rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub config: crate::config::BacktestConfig,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub starting_balance: f64,
    pub final_equity: f64,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: MetricsSnapshot,
    pub skipped_entries: Vec<EntrySkip>,
}

/// One parameter's enumerable domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterDomain {
    /// Explicit list of candidate values, evaluated in the given order.
    Values(Vec<f64>),
    /// Inclusive numeric range walked by `step`.
    Range { min: f64, max: f64, step: f64 },
}

/// One successfully evaluated parameter combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub parameters: ParameterBag,
    #[serde(with = "float_infinite_as_null")]
    pub score: f64,
    pub result: BacktestResult,
}

/// A combination whose run failed; excluded from ranking, never fatal for
/// the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationFailure {
    pub parameters: ParameterBag,
    pub error: String,
}

/// Ranked output of one optimization batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub metric: String,
    /// Sorted descending by score; ties prefer fewer trades, then the
    /// parameter signature.
    pub ranked: Vec<OptimizationResult>,
    pub failures: Vec<OptimizationFailure>,
    pub evaluated: usize,
}

/// One rolling train/test window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardWindow {
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

/// Out-of-sample outcome for one completed window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResult {
    pub window: WalkForwardWindow,
    pub parameters: ParameterBag,
    pub train_score: f64,
    pub train_net_profit: f64,
    pub test_result: BacktestResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum WindowOutcome {
    Completed(Box<WindowResult>),
    Skipped {
        window: WalkForwardWindow,
        reason: String,
    },
}

/// Aggregated out-of-sample view across all walk-forward windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardReport {
    pub windows: Vec<WindowOutcome>,
    pub completed_windows: usize,
    pub skipped_windows: usize,
    pub combined_trades: Vec<ClosedTrade>,
    pub combined_equity: Vec<EquityPoint>,
    pub combined_metrics: MetricsSnapshot,
    /// Out-of-sample vs in-sample comparison from the configured scorer.
    pub robustness_score: f64,
}

/// JSON carries no non-finite floats; an infinite profit factor (or a score
/// derived from one) crosses the wire as null and reads back as +inf.
mod float_infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Deterministic run identifier; reruns of the same configuration must
/// produce byte-identical results, so no random or clock-derived ids.
pub fn generate_run_id(
    symbol: &str,
    timeframe: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    format!(
        "{}_{}_{}_{}",
        symbol,
        timeframe,
        start.format("%Y%m%d%H%M"),
        end.format("%Y%m%d%H%M")
    )
}

pub fn generate_trade_id(run_id: &str, position_id: u64, exit_time: DateTime<Utc>) -> String {
    format!("{}_{}_{}", run_id, position_id, exit_time.format("%Y%m%d%H%M"))
}
