use crate::error::{EngineError, Result};
use crate::indicators;
use crate::models::{Bar, Direction, ParameterBag, Signal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy::SuggestedLevels;

/// Moving-average cross: Buy when the fast average crosses above the slow
/// one, Sell on the opposite cross. The first bar where both averages are
/// defined emits the prevailing side so an already-established trend is not
/// missed.
pub struct MaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    min_strength: f64,
    levels: SuggestedLevels,
}

impl MaCrossStrategy {
    pub fn new(parameters: &ParameterBag) -> Result<Self> {
        let fast_period = get_param_usize(parameters, "fastPeriod", 10, 1);
        let slow_period = get_param_usize(parameters, "slowPeriod", 30, 2);
        if fast_period >= slow_period {
            return Err(EngineError::Configuration(format!(
                "fast period {} must be below slow period {}",
                fast_period, slow_period
            )));
        }
        Ok(Self {
            fast_period,
            slow_period,
            min_strength: get_param_f64(parameters, "minStrength", 0.0),
            levels: SuggestedLevels::from_params(parameters),
        })
    }

    fn strength(fast: f64, slow: f64, close: f64) -> f64 {
        if close.abs() < f64::EPSILON {
            return 0.0;
        }
        ((fast - slow).abs() / close * 100.0).clamp(0.05, 1.0)
    }
}

impl super::Strategy for MaCrossStrategy {
    fn kind(&self) -> &str {
        "ma_cross"
    }

    fn min_lookback(&self) -> usize {
        // The slow average is first defined once slow_period closes exist,
        // i.e. at index slow_period - 1.
        self.slow_period - 1
    }

    fn signal_at(&self, bars: &[Bar], index: usize) -> Signal {
        if index >= bars.len() || index + 1 < self.slow_period || index == 0 {
            return Signal::neutral();
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|b| b.close).collect();
        let fast = indicators::sma(&closes, self.fast_period);
        let slow = indicators::sma(&closes, self.slow_period);

        let (Some(fast_now), Some(slow_now)) = (fast[index], slow[index]) else {
            return Signal::neutral();
        };

        // Previous relation; None on the first bar where both are defined.
        let was_above = match (fast[index - 1], slow[index - 1]) {
            (Some(f), Some(s)) => Some(f > s),
            _ => None,
        };

        let direction = if fast_now > slow_now && was_above != Some(true) {
            Direction::Buy
        } else if fast_now < slow_now && was_above != Some(false) {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        if direction == Direction::Neutral {
            return Signal::neutral();
        }

        let strength = Self::strength(fast_now, slow_now, bars[index].close);
        if strength < self.min_strength {
            return Signal::neutral();
        }
        self.levels.signal(direction, strength)
    }
}
