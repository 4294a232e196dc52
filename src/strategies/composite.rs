use crate::error::{EngineError, Result};
use crate::indicators;
use crate::models::{Bar, Direction, ParameterBag, Signal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy::SuggestedLevels;

/// Multi-indicator strategy: each sub-indicator produces a normalized score
/// in [-1, 1] (positive = bullish); scores weaker than that indicator's own
/// threshold are dropped, the rest fold into a weighted mean that is
/// compared against the entry threshold. A weighted score exactly at the
/// threshold stays Neutral.
pub struct CompositeStrategy {
    ma_fast: usize,
    ma_slow: usize,
    rsi_period: usize,
    macd_fast: usize,
    macd_slow: usize,
    macd_signal: usize,
    bb_period: usize,
    bb_width: f64,
    ma_weight: f64,
    rsi_weight: f64,
    macd_weight: f64,
    bb_weight: f64,
    ma_threshold: f64,
    rsi_threshold: f64,
    macd_threshold: f64,
    bb_threshold: f64,
    entry_threshold: f64,
    levels: SuggestedLevels,
}

impl CompositeStrategy {
    pub fn new(parameters: &ParameterBag) -> Result<Self> {
        let ma_fast = get_param_usize(parameters, "maFastPeriod", 10, 1);
        let ma_slow = get_param_usize(parameters, "maSlowPeriod", 30, 2);
        let macd_fast = get_param_usize(parameters, "macdFastPeriod", 12, 1);
        let macd_slow = get_param_usize(parameters, "macdSlowPeriod", 26, 2);
        if ma_fast >= ma_slow || macd_fast >= macd_slow {
            return Err(EngineError::Configuration(
                "fast periods must be below their slow periods".into(),
            ));
        }

        let strategy = Self {
            ma_fast,
            ma_slow,
            rsi_period: get_param_usize(parameters, "rsiPeriod", 14, 2),
            macd_fast,
            macd_slow,
            macd_signal: get_param_usize(parameters, "macdSignalPeriod", 9, 1),
            bb_period: get_param_usize(parameters, "bbPeriod", 20, 2),
            bb_width: get_param_f64(parameters, "bbWidth", 2.0),
            ma_weight: get_param_f64(parameters, "maWeight", 1.0),
            rsi_weight: get_param_f64(parameters, "rsiWeight", 1.0),
            macd_weight: get_param_f64(parameters, "macdWeight", 1.0),
            bb_weight: get_param_f64(parameters, "bbWeight", 1.0),
            ma_threshold: get_param_f64(parameters, "maThreshold", 0.0),
            rsi_threshold: get_param_f64(parameters, "rsiThreshold", 0.0),
            macd_threshold: get_param_f64(parameters, "macdThreshold", 0.0),
            bb_threshold: get_param_f64(parameters, "bbThreshold", 0.0),
            entry_threshold: get_param_f64(parameters, "entryThreshold", 0.25),
            levels: SuggestedLevels::from_params(parameters),
        };

        let total_weight = strategy.ma_weight
            + strategy.rsi_weight
            + strategy.macd_weight
            + strategy.bb_weight;
        if total_weight <= 0.0 {
            return Err(EngineError::Configuration(
                "at least one indicator weight must be positive".into(),
            ));
        }
        Ok(strategy)
    }

    fn ma_score(&self, closes: &[f64], index: usize) -> Option<f64> {
        let fast = indicators::sma(closes, self.ma_fast)[index]?;
        let slow = indicators::sma(closes, self.ma_slow)[index]?;
        let close = closes[index];
        if close.abs() < f64::EPSILON {
            return None;
        }
        Some(((fast - slow) / close * 50.0).clamp(-1.0, 1.0))
    }

    fn rsi_score(&self, closes: &[f64], index: usize) -> Option<f64> {
        let value = indicators::rsi(closes, self.rsi_period)[index]?;
        Some(((50.0 - value) / 50.0).clamp(-1.0, 1.0))
    }

    fn macd_score(&self, closes: &[f64], index: usize) -> Option<f64> {
        if index < self.macd_slow + self.macd_signal {
            return None;
        }
        let series =
            indicators::macd(closes, self.macd_fast, self.macd_slow, self.macd_signal);
        let close = closes[index];
        if close.abs() < f64::EPSILON {
            return None;
        }
        Some((series.histogram[index] / close * 200.0).clamp(-1.0, 1.0))
    }

    fn bb_score(&self, closes: &[f64], index: usize) -> Option<f64> {
        let band = indicators::bollinger(closes, self.bb_period, self.bb_width)[index]?;
        let half_width = band.upper - band.middle;
        if half_width <= f64::EPSILON {
            return None;
        }
        Some(((band.middle - closes[index]) / half_width).clamp(-1.0, 1.0))
    }

    fn gated(score: Option<f64>, threshold: f64) -> f64 {
        match score {
            Some(value) if value.abs() > threshold => value,
            _ => 0.0,
        }
    }
}

impl super::Strategy for CompositeStrategy {
    fn kind(&self) -> &str {
        "composite"
    }

    fn min_lookback(&self) -> usize {
        self.ma_slow
            .max(self.rsi_period + 1)
            .max(self.macd_slow + self.macd_signal)
            .max(self.bb_period)
    }

    fn signal_at(&self, bars: &[Bar], index: usize) -> Signal {
        if index >= bars.len() || index < self.min_lookback() {
            return Signal::neutral();
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|b| b.close).collect();
        let weighted_sum = Self::gated(self.ma_score(&closes, index), self.ma_threshold)
            * self.ma_weight
            + Self::gated(self.rsi_score(&closes, index), self.rsi_threshold) * self.rsi_weight
            + Self::gated(self.macd_score(&closes, index), self.macd_threshold)
                * self.macd_weight
            + Self::gated(self.bb_score(&closes, index), self.bb_threshold) * self.bb_weight;
        let total_weight =
            self.ma_weight + self.rsi_weight + self.macd_weight + self.bb_weight;
        let score = weighted_sum / total_weight;

        // Strict comparison: a score exactly at the threshold is no trade.
        let direction = if score > self.entry_threshold {
            Direction::Buy
        } else if score < -self.entry_threshold {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        if direction == Direction::Neutral {
            return Signal::neutral();
        }
        self.levels.signal(direction, score.abs().min(1.0))
    }
}
