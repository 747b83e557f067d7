use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Side;

/// Why a position was closed. Every closed trade carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    StrategyExit,
    TimeExpired,
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::TakeProfit => write!(f, "Take Profit"),
            ExitReason::TrailingStop => write!(f, "Trailing Stop"),
            ExitReason::StrategyExit => write!(f, "Strategy Exit"),
            ExitReason::TimeExpired => write!(f, "Time Expired"),
            ExitReason::EndOfData => write!(f, "End of Data"),
        }
    }
}

/// Record of a completed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub margin: Decimal,
    /// Price P&L before fees.
    pub gross_pnl: Decimal,
    /// Net of entry and exit fees.
    pub pnl: Decimal,
    /// Net P&L relative to the locked margin, in percent.
    pub return_pct: Decimal,
    pub fees: Decimal,
    pub strategy: String,
    pub exit_reason: ExitReason,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// An entry signal that did not become a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub timestamp: DateTime<Utc>,
    pub step: usize,
    pub side: Side,
    pub reason: String,
}

/// Point on the balance history, one per candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    /// Realised balance.
    pub balance: Decimal,
    /// Balance plus the open position's unrealised P&L at the candle close.
    pub equity: Decimal,
    pub drawdown_pct: Decimal,
    /// Running maximum of `drawdown_pct`.
    pub max_drawdown_pct: Decimal,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub strategy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub candles_processed: usize,

    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub net_profit: Decimal,
    pub total_return_pct: Decimal,

    // Risk Metrics
    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: Decimal,

    // Trade Statistics
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_pct: Decimal,
    pub profit_factor: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub average_trade_pnl: Decimal,

    // Profit/Loss Breakdown
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub total_fees: Decimal,
    pub exit_reasons: BTreeMap<ExitReason, u64>,

    pub trades: Vec<TradeRecord>,
    pub skipped_entries: Vec<SkippedEntry>,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestResult {
    /// Pretty print results to console
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("                    BACKTEST RESULTS");
        println!("{}", "=".repeat(60));
        println!("Symbol:             {}", self.symbol);
        println!("Strategy:           {}", self.strategy);
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            println!("Period:             {} to {}", start, end);
        }
        println!("Candles:            {}", self.candles_processed);
        println!("Initial Balance:    ${:.2}", self.initial_balance);
        println!("Final Balance:      ${:.2}", self.final_balance);
        println!("{}", "-".repeat(60));
        println!("PERFORMANCE");
        println!("  Total Return:       ${:.2} ({:.2}%)", self.net_profit, self.total_return_pct);
        println!("  Max Drawdown:       {:.2}%", self.max_drawdown_pct);
        println!("  Sharpe Ratio:       {:.4}", self.sharpe_ratio);
        println!("{}", "-".repeat(60));
        println!("TRADES");
        println!("  Total Trades:       {}", self.total_trades);
        println!("  Winning Trades:     {} ({:.1}%)", self.winning_trades, self.win_rate_pct);
        println!("  Losing Trades:      {}", self.losing_trades);
        println!("  Profit Factor:      {:.2}", self.profit_factor);
        println!("  Average Win:        ${:.2}", self.average_win);
        println!("  Average Loss:       ${:.2}", self.average_loss);
        println!("  Largest Win:        ${:.2}", self.largest_win);
        println!("  Largest Loss:       ${:.2}", self.largest_loss);
        println!("  Average Trade:      ${:.2}", self.average_trade_pnl);
        println!("  Total Fees:         ${:.2}", self.total_fees);
        println!("  Skipped Entries:    {}", self.skipped_entries.len());
        if !self.exit_reasons.is_empty() {
            println!("{}", "-".repeat(60));
            println!("EXITS");
            for (reason, count) in &self.exit_reasons {
                println!("  {:<20}{}", format!("{}:", reason), count);
            }
        }
        println!("{}", "=".repeat(60));
    }
}

/// Calculator for backtest metrics
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from trades and the balance history
    pub fn calculate(
        symbol: &str,
        strategy: &str,
        initial_balance: Decimal,
        final_balance: Decimal,
        trades: Vec<TradeRecord>,
        skipped_entries: Vec<SkippedEntry>,
        equity_curve: Vec<EquityPoint>,
    ) -> BacktestResult {
        let total_trades = trades.len() as u64;
        let wins: Vec<Decimal> = trades.iter().filter(|t| t.is_win()).map(|t| t.pnl).collect();
        let losses: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .collect();

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().copied().sum();
        let total_fees: Decimal = trades.iter().map(|t| t.fees).sum();

        let net_profit = final_balance - initial_balance;
        let total_return_pct = if !initial_balance.is_zero() {
            (net_profit / initial_balance) * dec!(100)
        } else {
            Decimal::ZERO
        };

        let win_rate_pct = if total_trades > 0 {
            Decimal::from(wins.len() as u64) / Decimal::from(total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };

        // Profit factor
        let profit_factor = if !gross_loss.is_zero() {
            gross_profit / gross_loss
        } else if gross_profit > Decimal::ZERO {
            dec!(100)
        } else {
            Decimal::ONE
        };

        let average_win = average(&wins);
        let average_loss = average(&losses);
        let largest_win = wins.iter().copied().max().unwrap_or(Decimal::ZERO);
        let largest_loss = losses.iter().copied().max().unwrap_or(Decimal::ZERO);

        let average_trade_pnl = if total_trades > 0 {
            trades.iter().map(|t| t.pnl).sum::<Decimal>() / Decimal::from(total_trades)
        } else {
            Decimal::ZERO
        };

        let max_drawdown_pct = equity_curve
            .last()
            .map(|e| e.max_drawdown_pct)
            .unwrap_or(Decimal::ZERO);

        let balances: Vec<Decimal> = equity_curve.iter().map(|e| e.balance).collect();
        let sharpe_ratio = Self::sharpe_ratio(initial_balance, &balances);

        let mut exit_reasons = BTreeMap::new();
        for trade in &trades {
            *exit_reasons.entry(trade.exit_reason).or_insert(0) += 1;
        }

        BacktestResult {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            start_time: equity_curve.first().map(|e| e.timestamp),
            end_time: equity_curve.last().map(|e| e.timestamp),
            candles_processed: equity_curve.len(),
            initial_balance,
            final_balance,
            net_profit,
            total_return_pct,
            max_drawdown_pct,
            sharpe_ratio,
            total_trades,
            winning_trades: wins.len() as u64,
            losing_trades: losses.len() as u64,
            win_rate_pct,
            profit_factor,
            average_win,
            average_loss,
            largest_win,
            largest_loss,
            average_trade_pnl,
            gross_profit,
            gross_loss,
            total_fees,
            exit_reasons,
            trades,
            skipped_entries,
            equity_curve,
        }
    }

    /// Mean over population standard deviation of per-step balance returns.
    /// No risk-free rate, no annualisation.
    pub fn sharpe_ratio(initial_balance: Decimal, balances: &[Decimal]) -> Decimal {
        let mut returns = Vec::with_capacity(balances.len());
        let mut previous = initial_balance;
        for balance in balances {
            if !previous.is_zero() {
                let r: f64 = ((*balance - previous) / previous).try_into().unwrap_or(0.0);
                returns.push(r);
            }
            previous = *balance;
        }
        if returns.is_empty() {
            return Decimal::ZERO;
        }

        let n = returns.len() as f64;
        let mean_return = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        let sharpe = if std_dev > 0.0 { mean_return / std_dev } else { 0.0 };
        Decimal::try_from(sharpe).map(|s| s.round_dp(6)).unwrap_or(Decimal::ZERO)
    }
}

fn average(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        Decimal::ZERO
    } else {
        values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn trade(id: u64, pnl: Decimal, reason: ExitReason) -> TradeRecord {
        let entry_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TradeRecord {
            id,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            entry_time,
            exit_time: entry_time + Duration::hours(1),
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            quantity: Decimal::ONE,
            margin: dec!(100),
            gross_pnl: pnl + dec!(0.2),
            pnl,
            return_pct: pnl,
            fees: dec!(0.2),
            strategy: "test".to_string(),
            exit_reason: reason,
        }
    }

    fn point(hour: i64, balance: Decimal, max_dd: Decimal) -> EquityPoint {
        EquityPoint {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            balance,
            equity: balance,
            drawdown_pct: max_dd,
            max_drawdown_pct: max_dd,
        }
    }

    #[test]
    fn test_trade_statistics() {
        let trades = vec![
            trade(1, dec!(30), ExitReason::TakeProfit),
            trade(2, dec!(-10), ExitReason::StopLoss),
            trade(3, dec!(10), ExitReason::TakeProfit),
            trade(4, dec!(-20), ExitReason::EndOfData),
        ];
        let curve = vec![point(0, dec!(1000), Decimal::ZERO), point(1, dec!(1010), dec!(1.5))];
        let result = MetricsCalculator::calculate(
            "BTCUSDT",
            "test",
            dec!(1000),
            dec!(1010),
            trades,
            vec![],
            curve,
        );

        assert_eq!(result.total_trades, 4);
        assert_eq!(result.winning_trades, 2);
        assert_eq!(result.losing_trades, 2);
        assert_eq!(result.win_rate_pct, dec!(50));
        assert_eq!(result.gross_profit, dec!(40));
        assert_eq!(result.gross_loss, dec!(30));
        assert_eq!(result.average_win, dec!(20));
        assert_eq!(result.average_loss, dec!(15));
        assert_eq!(result.largest_win, dec!(30));
        assert_eq!(result.largest_loss, dec!(20));
        assert_eq!(result.average_trade_pnl, dec!(2.5));
        assert_eq!(result.total_fees, dec!(0.8));
        assert_eq!(result.total_return_pct, dec!(1));
        assert_eq!(result.max_drawdown_pct, dec!(1.5));
        assert_eq!(result.exit_reasons.get(&ExitReason::TakeProfit), Some(&2));
        assert_eq!(result.exit_reasons.get(&ExitReason::TrailingStop), None);
    }

    #[test]
    fn test_empty_run_metrics() {
        let result = MetricsCalculator::calculate(
            "BTCUSDT",
            "test",
            dec!(1000),
            dec!(1000),
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.win_rate_pct, Decimal::ZERO);
        assert_eq!(result.sharpe_ratio, Decimal::ZERO);
        assert_eq!(result.profit_factor, Decimal::ONE);
        assert_eq!(result.start_time, None);
    }

    #[test]
    fn test_sharpe_ratio_uses_population_std() {
        // Returns +10%, -10%: mean 0
        assert_eq!(
            MetricsCalculator::sharpe_ratio(dec!(100), &[dec!(110), dec!(99)]),
            Decimal::ZERO
        );
        // Constant balance: zero deviation
        assert_eq!(
            MetricsCalculator::sharpe_ratio(dec!(100), &[dec!(100), dec!(100)]),
            Decimal::ZERO
        );
        // Returns +2%, +0%: mean 0.01, population std 0.01
        assert_eq!(
            MetricsCalculator::sharpe_ratio(dec!(100), &[dec!(102), dec!(102)]),
            Decimal::ONE
        );
    }
}
