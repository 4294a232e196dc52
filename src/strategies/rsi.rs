use crate::error::{EngineError, Result};
use crate::indicators;
use crate::models::{Bar, Direction, ParameterBag, Signal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy::SuggestedLevels;

pub struct RsiStrategy {
    period: usize,
    oversold_level: f64,
    overbought_level: f64,
    min_strength: f64,
    levels: SuggestedLevels,
}

impl RsiStrategy {
    pub fn new(parameters: &ParameterBag) -> Result<Self> {
        let period = get_param_usize(parameters, "period", 14, 2);
        let oversold_level = get_param_f64(parameters, "oversoldLevel", 30.0);
        let overbought_level = get_param_f64(parameters, "overboughtLevel", 70.0);
        if oversold_level >= overbought_level {
            return Err(EngineError::Configuration(format!(
                "oversold level {} must be below overbought level {}",
                oversold_level, overbought_level
            )));
        }
        Ok(Self {
            period,
            oversold_level,
            overbought_level,
            min_strength: get_param_f64(parameters, "minStrength", 0.0),
            levels: SuggestedLevels::from_params(parameters),
        })
    }
}

impl super::Strategy for RsiStrategy {
    fn kind(&self) -> &str {
        "rsi"
    }

    fn min_lookback(&self) -> usize {
        self.period + 1
    }

    fn signal_at(&self, bars: &[Bar], index: usize) -> Signal {
        if index >= bars.len() || index <= self.period {
            return Signal::neutral();
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|b| b.close).collect();
        let Some(value) = indicators::rsi(&closes, self.period)[index] else {
            return Signal::neutral();
        };

        if value < self.oversold_level {
            let strength = ((self.oversold_level - value) / self.oversold_level + 0.5).min(1.0);
            if strength >= self.min_strength {
                return self.levels.signal(Direction::Buy, strength);
            }
        } else if value > self.overbought_level {
            let strength = ((value - self.overbought_level) / (100.0 - self.overbought_level)
                + 0.5)
                .min(1.0);
            if strength >= self.min_strength {
                return self.levels.signal(Direction::Sell, strength);
            }
        }

        Signal::neutral()
    }
}
