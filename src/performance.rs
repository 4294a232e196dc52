use crate::models::{ClosedTrade, EquityPoint, MetricsSnapshot};
use statrs::statistics::Statistics;

/// Pure metric computation over a finished run's trade list and equity
/// curve. Everything here is derivable from a stored result alone, so
/// reports can be re-scored under a different metric without re-simulating.
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn compute(
        trades: &[ClosedTrade],
        equity_curve: &[EquityPoint],
        annualization_factor: f64,
    ) -> MetricsSnapshot {
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;

        for trade in trades {
            if trade.profit > 0.0 {
                gross_profit += trade.profit;
                winning_trades += 1;
            } else if trade.profit < 0.0 {
                gross_loss += -trade.profit;
                losing_trades += 1;
            }
        }

        let net_profit = gross_profit - gross_loss;
        let total_trades = trades.len();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let avg_trade = if total_trades > 0 {
            net_profit / total_trades as f64
        } else {
            0.0
        };

        let (longest_win_streak, longest_loss_streak) = Self::streaks(trades);

        MetricsSnapshot {
            net_profit,
            gross_profit,
            gross_loss,
            profit_factor,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            max_drawdown_pct: Self::max_drawdown_pct(equity_curve),
            sharpe_ratio: Self::sharpe_ratio(equity_curve, annualization_factor),
            avg_trade,
            longest_win_streak,
            longest_loss_streak,
        }
    }

    /// Largest peak-to-trough drop of the equity curve, as a percentage of
    /// the peak. Always in 0..=100; 0 for a non-decreasing curve.
    fn max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
        let mut peak = f64::NEG_INFINITY;
        let mut max_drawdown = 0.0;

        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
            } else if peak > 0.0 {
                let drawdown = (peak - point.equity) / peak * 100.0;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }

        max_drawdown.clamp(0.0, 100.0)
    }

    /// Mean bar-to-bar return over its standard deviation, scaled by the
    /// square root of the annualization factor.
    fn sharpe_ratio(equity_curve: &[EquityPoint], annualization_factor: f64) -> f64 {
        if equity_curve.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let previous = window[0].equity;
                if previous > 0.0 {
                    (window[1].equity - previous) / previous
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        mean_return / std_dev * annualization_factor.max(1.0).sqrt()
    }

    /// Longest runs of consecutive winners and losers, in exit order.
    /// Zero-profit trades break both runs.
    fn streaks(trades: &[ClosedTrade]) -> (usize, usize) {
        let mut longest_win = 0usize;
        let mut longest_loss = 0usize;
        let mut current_win = 0usize;
        let mut current_loss = 0usize;

        for trade in trades {
            if trade.profit > 0.0 {
                current_win += 1;
                current_loss = 0;
            } else if trade.profit < 0.0 {
                current_loss += 1;
                current_win = 0;
            } else {
                current_win = 0;
                current_loss = 0;
            }
            longest_win = longest_win.max(current_win);
            longest_loss = longest_loss.max(current_loss);
        }

        (longest_win, longest_loss)
    }
}
