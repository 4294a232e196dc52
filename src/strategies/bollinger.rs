use crate::error::{EngineError, Result};
use crate::indicators;
use crate::models::{Bar, Direction, ParameterBag, Signal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy::SuggestedLevels;

/// Mean-reversion on Bollinger bands: Buy when the close drops below the
/// lower band, Sell when it rises above the upper band. Strength scales with
/// how deep the close penetrates the band.
pub struct BollingerStrategy {
    period: usize,
    width: f64,
    min_strength: f64,
    levels: SuggestedLevels,
}

impl BollingerStrategy {
    pub fn new(parameters: &ParameterBag) -> Result<Self> {
        let width = get_param_f64(parameters, "bandWidth", 2.0);
        if width <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "band width must be positive (value: {})",
                width
            )));
        }
        Ok(Self {
            period: get_param_usize(parameters, "period", 20, 2),
            width,
            min_strength: get_param_f64(parameters, "minStrength", 0.0),
            levels: SuggestedLevels::from_params(parameters),
        })
    }
}

impl super::Strategy for BollingerStrategy {
    fn kind(&self) -> &str {
        "bollinger"
    }

    fn min_lookback(&self) -> usize {
        self.period
    }

    fn signal_at(&self, bars: &[Bar], index: usize) -> Signal {
        if index >= bars.len() || index + 1 < self.period {
            return Signal::neutral();
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|b| b.close).collect();
        let Some(band) = indicators::bollinger(&closes, self.period, self.width)[index] else {
            return Signal::neutral();
        };

        let half_width = band.upper - band.middle;
        if half_width <= f64::EPSILON {
            return Signal::neutral();
        }

        let close = bars[index].close;
        let (direction, penetration) = if close < band.lower {
            (Direction::Buy, band.lower - close)
        } else if close > band.upper {
            (Direction::Sell, close - band.upper)
        } else {
            return Signal::neutral();
        };

        let strength = (0.5 + penetration / half_width).min(1.0);
        if strength < self.min_strength {
            return Signal::neutral();
        }
        self.levels.signal(direction, strength)
    }
}
