//! Indicator math shared by the built-in strategies. Windowed indicators
//! return `None` until enough history exists, so callers never read a value
//! computed from a partial window.

/// Simple moving average; `None` until the window is full.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        out[i] = Some(window_sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    out.push(values[0]);
    for i in 1..values.len() {
        let previous = out[i - 1];
        out.push(values[i] * multiplier + previous * (1.0 - multiplier));
    }
    out
}

#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal_period);
    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();
    MacdSeries {
        macd: macd_line,
        signal: signal_line,
        histogram,
    }
}

/// Wilder-smoothed RSI; `None` until `period + 1` closes are available.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = values[i] - values[i - 1];
        if delta >= 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let delta = values[i] - values[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BollingerBand {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(values: &[f64], period: usize, width: f64) -> Vec<Option<BollingerBand>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let middles = sma(values, period);
    for i in (period - 1)..values.len() {
        let Some(middle) = middles[i] else { continue };
        let window = &values[i + 1 - period..=i];
        let variance =
            window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
        let deviation = variance.sqrt();
        out[i] = Some(BollingerBand {
            upper: middle + width * deviation,
            middle,
            lower: middle - width * deviation,
        });
    }
    out
}
