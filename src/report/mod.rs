use crate::ledger::LedgerRecord;
use crate::models::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// One entrance/exit pair from the ledger
#[derive(Debug, Clone, Serialize)]
pub struct RoundTrip {
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Entrance cost is charged against the trade
    pub pnl: Decimal,
}

/// Realised PnL summary of a replay ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct PnlReport {
    pub total_pnl: Decimal,
    pub total_cost: Decimal,
    pub winning_trades: usize,
    pub total_trades: usize,
    /// Percentage, 0-100
    pub win_rate: Decimal,
    pub volume: Decimal,
    pub trades: Vec<RoundTrip>,
    /// Set when the ledger ends with a position still open
    pub open_entry: Option<LedgerRecord>,
    /// Entrances never closed before a new entrance followed, e.g. a session
    /// that ended while in a position
    pub unclosed: Vec<LedgerRecord>,
}

impl PnlReport {
    /// Pair records in ledger order
    ///
    /// A record closes the open entrance only when it is on the opposite side
    /// with the same quantity; anything else starts a new round trip and the
    /// previous entrance is kept in `unclosed`.
    pub fn from_records(records: &[LedgerRecord]) -> Self {
        let mut report = PnlReport::default();
        let mut entry: Option<&LedgerRecord> = None;

        for record in records {
            match entry.take() {
                None => entry = Some(record),
                Some(open) if !closes(open, record) => {
                    report.unclosed.push(open.clone());
                    entry = Some(record);
                }
                Some(open) => {
                    let direction = open.side.sign();
                    let pnl = direction * (record.price - open.price) * record.qty - open.cost;

                    report.volume += open.price * record.qty;
                    report.total_cost += open.cost;
                    report.total_pnl += pnl;
                    report.total_trades += 1;
                    if pnl > Decimal::ZERO {
                        report.winning_trades += 1;
                    }

                    report.trades.push(RoundTrip {
                        side: open.side,
                        entry_time: open.timestamp,
                        exit_time: record.timestamp,
                        entry_price: open.price,
                        exit_price: record.price,
                        quantity: record.qty,
                        pnl,
                    });
                }
            }
        }

        if report.total_trades > 0 {
            report.win_rate = Decimal::from(report.winning_trades) * Decimal::ONE_HUNDRED
                / Decimal::from(report.total_trades);
        }
        report.open_entry = entry.cloned();
        report
    }

    pub fn print_summary(&self) {
        for trade in &self.trades {
            println!(
                "{:<5} {} -> {}  qty {}  PnL($): {}",
                trade.side,
                trade.entry_price,
                trade.exit_price,
                trade.quantity,
                trade.pnl.round_dp(4)
            );
        }

        println!();
        println!("Total PnL($): {}", self.total_pnl.round_dp(4));
        println!("Total Cost($): {}", self.total_cost.round_dp(4));
        println!(
            "Won {} out of {} trades. win rate(%): {}%",
            self.winning_trades,
            self.total_trades,
            self.win_rate.round_dp(2)
        );
        println!("Volume($): {}", self.volume.round_dp(4));

        if let Some(open) = &self.open_entry {
            println!(
                "Open {} position from {} @ {} not included",
                open.side, open.timestamp, open.price
            );
        }
        if !self.unclosed.is_empty() {
            println!("{} entrance(s) never closed, not included", self.unclosed.len());
        }
    }
}

fn closes(open: &LedgerRecord, record: &LedgerRecord) -> bool {
    record.side == open.side.opposite() && record.qty == open.qty
}
