pub mod signal;

pub use signal::{account_signal, AccountSignal, AccountSignalReceiver};

use crate::models::{
    Candle, ExitReason, Order, PositionSnapshot, PositionState, Side, Thresholds,
};
use crate::{ReplayError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One executed order as kept in the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub order_id: Uuid,
    pub order: Order,
    /// `price * quantity * fee_rate`, bookkeeping only
    pub cost: Decimal,
    /// Thresholds passed along with the order
    pub thresholds: Thresholds,
    pub reason: ExitReason,
}

/// Single simulated position backed by an append-only order ledger
///
/// Position state is never stored; it is folded from the ledger on demand.
/// The engine also holds the pricing quote: the candle the next client order
/// fills against.
pub struct PositionEngine {
    ledger: Vec<LedgerEntry>,
    thresholds: Thresholds,
    fee_rate: Decimal,
    quote: Option<Candle>,
}

impl PositionEngine {
    pub fn new(fee_rate: Decimal) -> Self {
        Self {
            ledger: Vec::new(),
            thresholds: Thresholds::default(),
            fee_rate,
            quote: None,
        }
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn quote(&self) -> Option<&Candle> {
        self.quote.as_ref()
    }

    /// Publish the candle that client orders will be priced against
    pub fn set_quote(&mut self, candle: Candle) {
        self.quote = Some(candle);
    }

    /// Signed sum of all order quantities (Buy positive)
    pub fn net_quantity(&self) -> Decimal {
        self.ledger.iter().map(|e| e.order.signed_quantity()).sum()
    }

    pub fn current_position_state(&self) -> PositionState {
        if self.ledger.is_empty() {
            return PositionState::New;
        }

        let net = self.net_quantity();
        if net.is_zero() {
            PositionState::Closed
        } else if net.is_sign_positive() {
            PositionState::Open(Side::Buy)
        } else {
            PositionState::Open(Side::Sell)
        }
    }

    /// The order that opened the current position
    pub fn entrance_order(&self) -> Option<&Order> {
        if self.current_position_state().is_open() {
            self.ledger.last().map(|e| &e.order)
        } else {
            None
        }
    }

    /// Market order priced at the quote's open
    pub fn place_market_order(
        &mut self,
        side: Side,
        quantity: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
    ) -> Result<Order> {
        let price = self
            .quote
            .as_ref()
            .map(|c| c.open)
            .ok_or_else(|| ReplayError::OrderRejected("no market data replayed yet".into()))?;

        self.operate(side, price, quantity, take_profit, stop_loss)
    }

    /// Execute an order at `entry_price`, timestamped with the quote's start
    pub fn operate(
        &mut self,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
    ) -> Result<Order> {
        let execution_time = self
            .quote
            .as_ref()
            .map(|c| c.start_datetime())
            .ok_or_else(|| ReplayError::OrderRejected("no market data replayed yet".into()))?;

        self.operate_at(
            side,
            entry_price,
            quantity,
            Thresholds::new(take_profit, stop_loss),
            execution_time,
            ExitReason::Manual,
        )
    }

    fn operate_at(
        &mut self,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        thresholds: Thresholds,
        execution_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<Order> {
        if quantity <= Decimal::ZERO {
            return Err(ReplayError::InvalidOrderRequest(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        if thresholds.take_profit.is_sign_negative() || thresholds.stop_loss.is_sign_negative() {
            return Err(ReplayError::InvalidOrderRequest(
                "take profit and stop loss must not be negative".into(),
            ));
        }

        // Only simple entrance/exit pairs
        if let PositionState::Open(open_side) = self.current_position_state() {
            if side == open_side {
                return Err(ReplayError::OrderRejected(format!(
                    "{} position already open",
                    open_side
                )));
            }
            let open_size = self.net_quantity().abs();
            if quantity != open_size {
                return Err(ReplayError::OrderRejected(format!(
                    "exit quantity {} does not offset open size {}",
                    quantity, open_size
                )));
            }
        }

        let order = Order {
            side,
            price: entry_price,
            quantity,
            execution_time,
        };
        let entry = LedgerEntry {
            order_id: Uuid::new_v4(),
            order: order.clone(),
            cost: entry_price * quantity * self.fee_rate,
            thresholds,
            reason,
        };

        tracing::info!(
            order_id = %entry.order_id,
            side = %side,
            price = %entry_price,
            qty = %quantity,
            cost = %entry.cost,
            ?reason,
            "Order executed"
        );

        self.ledger.push(entry);
        self.thresholds = thresholds;

        if self.current_position_state() == PositionState::Closed {
            self.thresholds = Thresholds::default();
            tracing::info!("Position closed");
        }

        Ok(order)
    }

    /// Fire take-profit or stop-loss against `candle`
    ///
    /// Also makes `candle` the pricing quote. Exits fill at the threshold
    /// price. Take-profit wins when both levels sit inside the same bar.
    pub fn evaluate_auto_exit(&mut self, candle: &Candle) -> Option<Order> {
        self.quote = Some(candle.clone());

        let open_side = match self.current_position_state() {
            PositionState::Open(side) => side,
            _ => return None,
        };
        if !self.thresholds.is_armed() {
            return None;
        }

        let tp = self.thresholds.take_profit();
        let sl = self.thresholds.stop_loss();

        let hit = match open_side {
            Side::Buy => {
                if tp.is_some_and(|tp| candle.high >= tp) {
                    tp.map(|p| (p, ExitReason::TakeProfit))
                } else if sl.is_some_and(|sl| candle.low <= sl) {
                    sl.map(|p| (p, ExitReason::StopLoss))
                } else {
                    None
                }
            }
            Side::Sell => {
                if tp.is_some_and(|tp| candle.low <= tp) {
                    tp.map(|p| (p, ExitReason::TakeProfit))
                } else if sl.is_some_and(|sl| candle.high >= sl) {
                    sl.map(|p| (p, ExitReason::StopLoss))
                } else {
                    None
                }
            }
        };

        let (price, reason) = hit?;
        let quantity = self.net_quantity().abs();

        match self.operate_at(
            open_side.opposite(),
            price,
            quantity,
            Thresholds::default(),
            candle.start_datetime(),
            reason,
        ) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::error!(error = %e, ?reason, "Auto-exit failed");
                None
            }
        }
    }

    /// Account-update view of the position
    pub fn snapshot(&self) -> PositionSnapshot {
        let updated_time = Utc::now();

        match (self.current_position_state(), self.entrance_order()) {
            (PositionState::Open(side), Some(entrance)) => PositionSnapshot {
                side: Some(side),
                entry_price: entrance.price,
                size: entrance.quantity,
                take_profit: self.thresholds.take_profit(),
                stop_loss: self.thresholds.stop_loss(),
                updated_time,
            },
            _ => PositionSnapshot {
                side: None,
                entry_price: Decimal::ZERO,
                size: Decimal::ZERO,
                take_profit: None,
                stop_loss: None,
                updated_time,
            },
        }
    }
}
