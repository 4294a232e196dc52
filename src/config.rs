use crate::error::{EngineError, Result};
use crate::models::{MetricsSnapshot, ParameterBag};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Position-lifecycle thresholds, all in price units. A non-positive
/// activation disables that stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Default stop-loss distance when a signal suggests none.
    pub stop_distance: f64,
    /// Default take-profit distance; `None` leaves the position without a
    /// target.
    pub target_distance: Option<f64>,
    /// Unrealized gain at which the stop moves to the open price.
    pub breakeven_activation: f64,
    /// Offset added past the open price when the stop moves to breakeven.
    pub breakeven_buffer: f64,
    /// Unrealized gain at which trailing starts.
    pub trailing_activation: f64,
    /// Minimum favorable move before the trailing stop advances again.
    pub trailing_step: f64,
    /// Distance kept between price and the trailing stop.
    pub trailing_distance: f64,
    /// Fraction of the position closed once breakeven is reached; 0 disables
    /// the scale-out.
    pub partial_close_fraction: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_distance: 1.0,
            target_distance: None,
            breakeven_activation: 0.0,
            breakeven_buffer: 0.0,
            trailing_activation: 0.0,
            trailing_step: 0.0,
            trailing_distance: 0.0,
            partial_close_fraction: 0.0,
        }
    }
}

/// Full configuration for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub starting_balance: f64,
    /// Fraction of current equity risked per trade.
    pub risk_per_trade: f64,
    /// Minimum volume increment of the instrument.
    pub lot_step: f64,
    /// Flat commission charged on every closed trade.
    pub commission: f64,
    /// Full bid/ask spread; entries pay half of it per side.
    pub spread: f64,
    /// Bars per year for Sharpe annualization (e.g. 252 for dailies).
    pub annualization_factor: f64,
    /// Strategy kind understood by the strategy factory.
    pub strategy: String,
    /// Opaque strategy parameter bag, passed through unchanged.
    pub parameters: ParameterBag,
    pub lifecycle: LifecycleConfig,
    /// Allow stacking entries while a position is already open.
    pub allow_pyramiding: bool,
    /// Close open positions when an opposing signal arrives.
    pub reversal_exit: bool,
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(EngineError::Configuration("symbol must not be empty".into()));
        }
        if self.end <= self.start {
            return Err(EngineError::Configuration(format!(
                "end date {} must be after start date {}",
                self.end, self.start
            )));
        }
        if !self.starting_balance.is_finite() || self.starting_balance <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "starting balance must be positive (value: {})",
                self.starting_balance
            )));
        }
        if !self.risk_per_trade.is_finite()
            || self.risk_per_trade <= 0.0
            || self.risk_per_trade > 1.0
        {
            return Err(EngineError::Configuration(format!(
                "risk per trade must be in (0, 1] (value: {})",
                self.risk_per_trade
            )));
        }
        if !self.lot_step.is_finite() || self.lot_step <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "lot step must be positive (value: {})",
                self.lot_step
            )));
        }
        if self.commission < 0.0 || self.spread < 0.0 {
            return Err(EngineError::Configuration(
                "commission and spread must not be negative".into(),
            ));
        }
        if !self.annualization_factor.is_finite() || self.annualization_factor <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "annualization factor must be positive (value: {})",
                self.annualization_factor
            )));
        }
        if !self.lifecycle.stop_distance.is_finite() || self.lifecycle.stop_distance <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "default stop distance must be positive (value: {})",
                self.lifecycle.stop_distance
            )));
        }
        if self.lifecycle.partial_close_fraction < 0.0
            || self.lifecycle.partial_close_fraction >= 1.0
        {
            return Err(EngineError::Configuration(format!(
                "partial close fraction must be in [0, 1) (value: {})",
                self.lifecycle.partial_close_fraction
            )));
        }
        Ok(())
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "SYM".to_string(),
            timeframe: "D1".to_string(),
            start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            starting_balance: 10_000.0,
            risk_per_trade: 0.02,
            lot_step: 0.01,
            commission: 0.0,
            spread: 0.0,
            annualization_factor: 252.0,
            strategy: "ma_cross".to_string(),
            parameters: ParameterBag::new(),
            lifecycle: LifecycleConfig::default(),
            allow_pyramiding: false,
            reversal_exit: true,
        }
    }
}

/// Metric an optimization batch ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMetric {
    NetProfit,
    ProfitFactor,
    SharpeRatio,
    WinRate,
    /// Lower drawdown ranks higher.
    MaxDrawdown,
}

impl OptimizationMetric {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "net_profit" | "netprofit" => Ok(Self::NetProfit),
            "profit_factor" | "profitfactor" => Ok(Self::ProfitFactor),
            "sharpe" | "sharpe_ratio" => Ok(Self::SharpeRatio),
            "win_rate" | "winrate" => Ok(Self::WinRate),
            "max_drawdown" | "maxdrawdown" => Ok(Self::MaxDrawdown),
            other => Err(EngineError::Configuration(format!(
                "unknown optimization metric '{}'",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NetProfit => "net profit",
            Self::ProfitFactor => "profit factor",
            Self::SharpeRatio => "Sharpe ratio",
            Self::WinRate => "win rate",
            Self::MaxDrawdown => "max drawdown",
        }
    }

    /// Ranking score for a finished run; always "higher is better".
    pub fn score(self, metrics: &MetricsSnapshot) -> f64 {
        let score = match self {
            Self::NetProfit => metrics.net_profit,
            Self::ProfitFactor => metrics.profit_factor,
            Self::SharpeRatio => metrics.sharpe_ratio,
            Self::WinRate => metrics.win_rate,
            Self::MaxDrawdown => -metrics.max_drawdown_pct,
        };
        if score.is_nan() {
            f64::NEG_INFINITY
        } else {
            score
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_config() -> BacktestConfig {
        BacktestConfig {
            start: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn validate_accepts_default_shape() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_dates() {
        let mut config = base_config();
        config.end = config.start;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_risk() {
        let mut config = base_config();
        config.risk_per_trade = 0.0;
        assert!(config.validate().is_err());
        config.risk_per_trade = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn metric_parse_and_score() {
        assert_eq!(
            OptimizationMetric::parse("sharpe").unwrap(),
            OptimizationMetric::SharpeRatio
        );
        assert!(OptimizationMetric::parse("cagr").is_err());

        let metrics = MetricsSnapshot {
            net_profit: 120.0,
            gross_profit: 200.0,
            gross_loss: 80.0,
            profit_factor: 2.5,
            total_trades: 4,
            winning_trades: 3,
            losing_trades: 1,
            win_rate: 0.75,
            max_drawdown_pct: 12.0,
            sharpe_ratio: 1.1,
            avg_trade: 30.0,
            longest_win_streak: 3,
            longest_loss_streak: 1,
        };
        assert_eq!(OptimizationMetric::NetProfit.score(&metrics), 120.0);
        assert_eq!(OptimizationMetric::MaxDrawdown.score(&metrics), -12.0);
    }
}
