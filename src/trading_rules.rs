use crate::models::{Bar, Direction};

pub const PRICE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized(f64),
    /// The risk budget rounds below one lot step.
    TooSmall,
    /// The notional the volume requires exceeds the available equity.
    InsufficientBalance { required: f64 },
}

pub struct SizingParams {
    pub equity: f64,
    pub risk_per_trade: f64,
    pub stop_distance: f64,
    pub lot_step: f64,
    pub price: f64,
}

/// Volume for a new position: the equity fraction risked per trade divided
/// by the stop distance, floored to the instrument's lot step. Entries whose
/// notional the balance cannot carry are rejected, not resized.
pub fn determine_volume(params: SizingParams) -> SizingOutcome {
    let SizingParams {
        equity,
        risk_per_trade,
        stop_distance,
        lot_step,
        price,
    } = params;

    if !equity.is_finite()
        || equity <= 0.0
        || !stop_distance.is_finite()
        || stop_distance <= 0.0
        || !price.is_finite()
        || price <= 0.0
    {
        return SizingOutcome::TooSmall;
    }

    let raw_volume = equity * risk_per_trade / stop_distance;
    // Tolerance keeps an exact multiple of the lot step from flooring one
    // step short.
    let steps = (raw_volume / lot_step + PRICE_EPSILON).floor();
    if steps < 1.0 {
        return SizingOutcome::TooSmall;
    }
    let volume = steps * lot_step;

    let required = volume * price;
    if required > equity + PRICE_EPSILON {
        return SizingOutcome::InsufficientBalance { required };
    }

    SizingOutcome::Sized(volume)
}

/// Stop level after the breakeven transition: the open price plus a small
/// buffer in the position's favor.
pub fn breakeven_stop(open_price: f64, direction: Direction, buffer: f64) -> f64 {
    open_price + direction.sign() * buffer
}

pub struct TrailingParams {
    pub direction: Direction,
    pub close: f64,
    pub current_stop: f64,
    pub trail_anchor: f64,
    pub trailing_step: f64,
    pub trailing_distance: f64,
}

/// New trailing stop when the close has advanced at least one trailing step
/// past the anchor set by the previous advance. The stop only ever tightens.
pub fn trailing_stop_advance(params: TrailingParams) -> Option<f64> {
    let TrailingParams {
        direction,
        close,
        current_stop,
        trail_anchor,
        trailing_step,
        trailing_distance,
    } = params;

    if trailing_distance <= 0.0 {
        return None;
    }

    let advance = (close - trail_anchor) * direction.sign();
    if advance + PRICE_EPSILON < trailing_step {
        return None;
    }

    let candidate = close - direction.sign() * trailing_distance;
    let improves = match direction {
        Direction::Buy => candidate > current_stop + PRICE_EPSILON,
        Direction::Sell => candidate < current_stop - PRICE_EPSILON,
        Direction::Neutral => false,
    };
    improves.then_some(candidate)
}

/// Fill price when the bar crosses the stop level, `None` otherwise. A bar
/// that opens beyond the stop fills at the open (gap), not at the level.
pub fn stop_exit_price(bar: &Bar, stop: f64, direction: Direction) -> Option<f64> {
    match direction {
        Direction::Buy => {
            if bar.low <= stop {
                Some(if bar.open <= stop { bar.open } else { stop })
            } else {
                None
            }
        }
        Direction::Sell => {
            if bar.high >= stop {
                Some(if bar.open >= stop { bar.open } else { stop })
            } else {
                None
            }
        }
        Direction::Neutral => None,
    }
}

/// Fill price when the bar reaches the take-profit level, gap-aware like
/// `stop_exit_price`.
pub fn target_exit_price(bar: &Bar, target: f64, direction: Direction) -> Option<f64> {
    match direction {
        Direction::Buy => {
            if bar.high >= target {
                Some(if bar.open >= target { bar.open } else { target })
            } else {
                None
            }
        }
        Direction::Sell => {
            if bar.low <= target {
                Some(if bar.open <= target { bar.open } else { target })
            } else {
                None
            }
        }
        Direction::Neutral => None,
    }
}
