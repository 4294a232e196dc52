use crate::error::{EngineError, Result};
use crate::indicators;
use crate::models::{Bar, Direction, ParameterBag, Signal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy::SuggestedLevels;

pub struct MacdStrategy {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    min_strength: f64,
    levels: SuggestedLevels,
}

impl MacdStrategy {
    pub fn new(parameters: &ParameterBag) -> Result<Self> {
        let fast_period = get_param_usize(parameters, "fastPeriod", 12, 1);
        let slow_period = get_param_usize(parameters, "slowPeriod", 26, 2);
        let signal_period = get_param_usize(parameters, "signalPeriod", 9, 1);
        if fast_period >= slow_period {
            return Err(EngineError::Configuration(format!(
                "fast period {} must be below slow period {}",
                fast_period, slow_period
            )));
        }
        Ok(Self {
            fast_period,
            slow_period,
            signal_period,
            min_strength: get_param_f64(parameters, "minStrength", 0.0),
            levels: SuggestedLevels::from_params(parameters),
        })
    }

    fn strength(histogram: f64, reference: f64) -> f64 {
        if reference.abs() < f64::EPSILON {
            return 0.5;
        }
        (histogram.abs() / reference.abs() * 10.0 + 0.5).min(1.0)
    }
}

impl super::Strategy for MacdStrategy {
    fn kind(&self) -> &str {
        "macd"
    }

    fn min_lookback(&self) -> usize {
        self.slow_period + self.signal_period
    }

    fn signal_at(&self, bars: &[Bar], index: usize) -> Signal {
        if index >= bars.len() || index < self.min_lookback() {
            return Signal::neutral();
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|b| b.close).collect();
        let series = indicators::macd(
            &closes,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );

        let macd_now = series.macd[index];
        let macd_prev = series.macd[index - 1];
        let signal_now = series.signal[index];
        let signal_prev = series.signal[index - 1];

        // Bullish cross: MACD line moves above the signal line.
        if macd_prev <= signal_prev && macd_now > signal_now {
            let strength = Self::strength(macd_now - signal_now, signal_now);
            if strength >= self.min_strength {
                return self.levels.signal(Direction::Buy, strength);
            }
        }

        // Bearish cross.
        if macd_prev >= signal_prev && macd_now < signal_now {
            let strength = Self::strength(macd_now - signal_now, signal_now);
            if strength >= self.min_strength {
                return self.levels.signal(Direction::Sell, strength);
            }
        }

        Signal::neutral()
    }
}
