use crate::config::{BacktestConfig, LifecycleConfig};
use crate::error::{EngineError, Result};
use crate::models::{
    generate_trade_id, Bar, ClosedTrade, Direction, ExitReason, Position, PositionStage, Signal,
};
use crate::trading_rules::{
    breakeven_stop, determine_volume, stop_exit_price, target_exit_price, trailing_stop_advance,
    SizingOutcome, SizingParams, TrailingParams, PRICE_EPSILON,
};
use log::debug;

/// Result of an entry request. Rejections are recoverable — the signal is
/// dropped and the simulation continues.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(u64),
    Rejected(String),
}

/// Owns every simulated position of one engine run and advances their
/// lifecycle bar by bar. One ledger per run; never shared across runs, which
/// is what keeps parallel optimizer workers independent.
pub struct PositionLedger {
    run_id: String,
    symbol: String,
    lifecycle: LifecycleConfig,
    risk_per_trade: f64,
    lot_step: f64,
    commission: f64,
    spread: f64,
    next_position_id: u64,
    open: Vec<Position>,
    closed: Vec<ClosedTrade>,
    balance: f64,
}

impl PositionLedger {
    pub fn new(config: &BacktestConfig, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            symbol: config.symbol.clone(),
            lifecycle: config.lifecycle.clone(),
            risk_per_trade: config.risk_per_trade,
            lot_step: config.lot_step,
            commission: config.commission,
            spread: config.spread,
            next_position_id: 1,
            open: Vec::new(),
            closed: Vec::new(),
            balance: config.starting_balance,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn unrealized(&self) -> f64 {
        self.open.iter().map(|p| p.unrealized_profit).sum()
    }

    /// Realized balance plus open mark-to-market.
    pub fn equity(&self) -> f64 {
        self.balance + self.unrealized()
    }

    pub fn has_open(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    pub fn into_closed_trades(self) -> Vec<ClosedTrade> {
        self.closed
    }

    /// Advance every open position by one bar: check stop/target exits, mark
    /// to market, then run the stage machine (Initial → Breakeven →
    /// Trailing). Positions opened on this bar are left untouched until the
    /// next one.
    pub fn update(&mut self, bar: &Bar) {
        let mut to_close: Vec<(usize, f64, ExitReason)> = Vec::new();
        let mut partials: Vec<usize> = Vec::new();

        for (index, position) in self.open.iter_mut().enumerate() {
            if bar.timestamp <= position.open_time {
                continue;
            }
            position.bars_held += 1;

            // Stop fills take precedence when both levels sit inside one bar.
            if let Some(price) = stop_exit_price(bar, position.stop_loss, position.direction) {
                to_close.push((index, price, ExitReason::StopLoss));
                continue;
            }
            if let Some(target) = position.take_profit {
                if let Some(price) = target_exit_price(bar, target, position.direction) {
                    to_close.push((index, price, ExitReason::TakeProfit));
                    continue;
                }
            }

            let sign = position.direction.sign();
            position.unrealized_profit =
                (bar.close - position.open_price) * sign * position.volume;
            let excursion = (bar.close - position.open_price) * sign;

            if position.stage == PositionStage::Initial
                && self.lifecycle.breakeven_activation > 0.0
                && excursion + PRICE_EPSILON >= self.lifecycle.breakeven_activation
            {
                position.stage = PositionStage::Breakeven;
                let breakeven = breakeven_stop(
                    position.open_price,
                    position.direction,
                    self.lifecycle.breakeven_buffer,
                );
                position.stop_loss = match position.direction {
                    Direction::Buy => breakeven.max(position.stop_loss),
                    Direction::Sell => breakeven.min(position.stop_loss),
                    Direction::Neutral => position.stop_loss,
                };
                if self.lifecycle.partial_close_fraction > 0.0 && !position.partial_done {
                    partials.push(index);
                }
            }

            let trailing_reachable = position.stage == PositionStage::Breakeven
                || (position.stage == PositionStage::Initial
                    && self.lifecycle.breakeven_activation <= 0.0);
            if trailing_reachable
                && self.lifecycle.trailing_activation > 0.0
                && excursion + PRICE_EPSILON >= self.lifecycle.trailing_activation
            {
                position.stage = PositionStage::Trailing;
                position.trail_anchor = bar.close;
                let candidate =
                    bar.close - position.direction.sign() * self.lifecycle.trailing_distance;
                let improves = match position.direction {
                    Direction::Buy => candidate > position.stop_loss,
                    Direction::Sell => candidate < position.stop_loss,
                    Direction::Neutral => false,
                };
                if self.lifecycle.trailing_distance > 0.0 && improves {
                    position.stop_loss = candidate;
                }
            } else if position.stage == PositionStage::Trailing {
                if let Some(new_stop) = trailing_stop_advance(TrailingParams {
                    direction: position.direction,
                    close: bar.close,
                    current_stop: position.stop_loss,
                    trail_anchor: position.trail_anchor,
                    trailing_step: self.lifecycle.trailing_step,
                    trailing_distance: self.lifecycle.trailing_distance,
                }) {
                    position.stop_loss = new_stop;
                    position.trail_anchor = bar.close;
                }
            }
        }

        for &index in &partials {
            self.partial_close_at_index(index, self.lifecycle.partial_close_fraction, bar);
        }
        for &(index, price, reason) in to_close.iter().rev() {
            self.close_at(index, price, bar, reason);
        }
    }

    /// Request a new position for a non-neutral signal. Volume comes from the
    /// risk-per-trade rule; unaffordable or sub-lot entries are rejected.
    pub fn open(&mut self, bar: &Bar, signal: &Signal) -> OpenOutcome {
        if signal.direction == Direction::Neutral {
            return OpenOutcome::Rejected("neutral signal".to_string());
        }

        let stop_distance = signal
            .stop_distance
            .unwrap_or(self.lifecycle.stop_distance);
        let sign = signal.direction.sign();
        let entry_price = bar.close + sign * self.spread / 2.0;
        let equity = self.equity();

        let volume = match determine_volume(SizingParams {
            equity,
            risk_per_trade: self.risk_per_trade,
            stop_distance,
            lot_step: self.lot_step,
            price: entry_price,
        }) {
            SizingOutcome::Sized(volume) => volume,
            SizingOutcome::TooSmall => {
                return OpenOutcome::Rejected("risk budget below one lot step".to_string());
            }
            SizingOutcome::InsufficientBalance { required } => {
                return OpenOutcome::Rejected(format!(
                    "insufficient balance (need {:.2}, have {:.2})",
                    required, equity
                ));
            }
        };

        let id = self.next_position_id;
        self.next_position_id += 1;
        let take_profit = signal
            .target_distance
            .or(self.lifecycle.target_distance)
            .map(|distance| entry_price + sign * distance);

        self.open.push(Position {
            id,
            symbol: self.symbol.clone(),
            direction: signal.direction,
            volume,
            original_volume: volume,
            open_price: entry_price,
            open_time: bar.timestamp,
            stop_loss: entry_price - sign * stop_distance,
            take_profit,
            stage: PositionStage::Initial,
            unrealized_profit: 0.0,
            trail_anchor: entry_price,
            bars_held: 0,
            partial_done: false,
        });
        OpenOutcome::Opened(id)
    }

    /// Close every open position that trades against `direction` at the
    /// current close (reversal exit).
    pub fn close_opposing(&mut self, bar: &Bar, direction: Direction) -> usize {
        let mut closed = 0;
        let mut index = 0;
        while index < self.open.len() {
            let position = &self.open[index];
            if position.direction.opposes(direction) && bar.timestamp > position.open_time {
                self.close_at(index, bar.close, bar, ExitReason::Reversal);
                closed += 1;
            } else {
                index += 1;
            }
        }
        closed
    }

    /// Explicitly close a fraction of one position. The emitted trade's
    /// profit is proportional to the closed volume; the remainder keeps its
    /// stage, stop and target unchanged.
    pub fn partial_close(
        &mut self,
        position_id: u64,
        fraction: f64,
        bar: &Bar,
    ) -> Result<ClosedTrade> {
        if !(0.0..1.0).contains(&fraction) || fraction <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "partial close fraction must be in (0, 1) (value: {})",
                fraction
            )));
        }
        let index = self
            .open
            .iter()
            .position(|p| p.id == position_id)
            .ok_or_else(|| {
                EngineError::Configuration(format!("no open position with id {}", position_id))
            })?;
        self.partial_close_at_index(index, fraction, bar)
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "fraction {} of position {} rounds below one lot step",
                    fraction, position_id
                ))
            })
    }

    /// Force-close everything at the last available price (end of data).
    pub fn force_close_all(&mut self, bar: &Bar) {
        while !self.open.is_empty() {
            let index = self.open.len() - 1;
            self.close_at(index, bar.close, bar, ExitReason::EndOfData);
        }
    }

    fn partial_close_at_index(
        &mut self,
        index: usize,
        fraction: f64,
        bar: &Bar,
    ) -> Option<ClosedTrade> {
        let position = &mut self.open[index];
        let total_steps = (position.volume / self.lot_step).round();
        let closed_steps = (total_steps * fraction + PRICE_EPSILON).floor();
        let closed_volume = closed_steps * self.lot_step;
        position.partial_done = true;
        if closed_steps < 1.0 || closed_steps >= total_steps {
            debug!(
                "partial close of position {} skipped (fraction {} of volume {})",
                position.id, fraction, position.volume
            );
            return None;
        }

        let sign = position.direction.sign();
        let profit =
            (bar.close - position.open_price) * sign * closed_volume - self.commission;
        position.volume -= closed_volume;
        position.unrealized_profit =
            (bar.close - position.open_price) * sign * position.volume;

        let trade = ClosedTrade {
            id: format!(
                "{}_partial",
                generate_trade_id(&self.run_id, position.id, bar.timestamp)
            ),
            position_id: position.id,
            symbol: position.symbol.clone(),
            direction: position.direction,
            volume: closed_volume,
            entry_price: position.open_price,
            entry_time: position.open_time,
            exit_price: bar.close,
            exit_time: bar.timestamp,
            profit,
            bars_held: position.bars_held,
            exit_reason: ExitReason::PartialClose,
        };
        self.balance += profit;
        self.closed.push(trade.clone());
        Some(trade)
    }

    fn close_at(&mut self, index: usize, price: f64, bar: &Bar, reason: ExitReason) {
        let mut position = self.open.remove(index);
        position.stage = PositionStage::Exited;
        let sign = position.direction.sign();
        let profit = (price - position.open_price) * sign * position.volume - self.commission;
        self.balance += profit;
        self.closed.push(ClosedTrade {
            id: generate_trade_id(&self.run_id, position.id, bar.timestamp),
            position_id: position.id,
            symbol: position.symbol,
            direction: position.direction,
            volume: position.volume,
            entry_price: position.open_price,
            entry_time: position.open_time,
            exit_price: price,
            exit_time: bar.timestamp,
            profit,
            bars_held: position.bars_held,
            exit_reason: reason,
        });
    }
}
