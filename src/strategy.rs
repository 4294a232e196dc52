use crate::error::{EngineError, Result};
use crate::models::{Bar, Direction, ParameterBag, Signal};
use crate::param_utils::get_param_distance;

/// A trading strategy: a pure mapping from bar history to signals.
///
/// Implementations must be stateless across calls and deterministic — the
/// same bars and parameters always produce the same signals, which is what
/// makes optimizer runs reproducible. `signal_at` must only read
/// `bars[..=index]`; the engine enforces this by passing a truncated slice.
pub trait Strategy {
    fn kind(&self) -> &str;

    /// Number of leading bars the strategy needs before it can emit a
    /// non-neutral signal.
    fn min_lookback(&self) -> usize;

    fn signal_at(&self, bars: &[Bar], index: usize) -> Signal;

    /// One signal per bar index; indices before the lookback are Neutral.
    fn generate_signals(&self, bars: &[Bar]) -> Vec<Signal> {
        (0..bars.len())
            .map(|index| {
                if index < self.min_lookback() {
                    Signal::neutral()
                } else {
                    self.signal_at(&bars[..=index], index)
                }
            })
            .collect()
    }
}

/// Optional stop/target distances a strategy attaches to its signals, read
/// once from the parameter bag.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestedLevels {
    stop: Option<f64>,
    target: Option<f64>,
}

impl SuggestedLevels {
    pub fn from_params(params: &ParameterBag) -> Self {
        Self {
            stop: get_param_distance(params, "stopDistance"),
            target: get_param_distance(params, "targetDistance"),
        }
    }

    pub fn signal(&self, direction: Direction, strength: f64) -> Signal {
        Signal {
            direction,
            strength: strength.clamp(0.0, 1.0),
            stop_distance: self.stop,
            target_distance: self.target,
        }
    }
}

#[path = "strategies/ma_cross.rs"]
pub mod ma_cross;

pub use ma_cross::MaCrossStrategy;

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RsiStrategy;

#[path = "strategies/bollinger.rs"]
pub mod bollinger;

pub use bollinger::BollingerStrategy;

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MacdStrategy;

#[path = "strategies/composite.rs"]
pub mod composite;

pub use composite::CompositeStrategy;

/// Build a strategy from its kind tag and parameter bag. Degenerate
/// parameter combinations (e.g. fast period >= slow period) are rejected
/// here, before any simulation runs.
pub fn create_strategy(
    kind: &str,
    parameters: &ParameterBag,
) -> Result<Box<dyn Strategy + Send + Sync>> {
    match kind {
        "ma_cross" => Ok(Box::new(MaCrossStrategy::new(parameters)?)),
        "rsi" => Ok(Box::new(RsiStrategy::new(parameters)?)),
        "bollinger" => Ok(Box::new(BollingerStrategy::new(parameters)?)),
        "macd" => Ok(Box::new(MacdStrategy::new(parameters)?)),
        "composite" => Ok(Box::new(CompositeStrategy::new(parameters)?)),
        other => Err(EngineError::Configuration(format!(
            "unknown strategy kind '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_unknown_kind() {
        assert!(matches!(
            create_strategy("momentum", &ParameterBag::new()),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn factory_rejects_degenerate_periods() {
        let mut params = ParameterBag::new();
        params.insert("fastPeriod".to_string(), 30.0);
        params.insert("slowPeriod".to_string(), 10.0);
        assert!(create_strategy("ma_cross", &params).is_err());
        assert!(create_strategy("macd", &params).is_err());
    }

    #[test]
    fn suggested_levels_flow_into_signals() {
        let mut params = ParameterBag::new();
        params.insert("stopDistance".to_string(), 2.5);
        let levels = SuggestedLevels::from_params(&params);
        let signal = levels.signal(Direction::Buy, 0.8);
        assert_eq!(signal.stop_distance, Some(2.5));
        assert_eq!(signal.target_distance, None);
    }
}
