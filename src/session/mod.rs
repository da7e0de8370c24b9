use crate::api::HistoricalSource;
use crate::engine::{account_signal, AccountSignal, AccountSignalReceiver, PositionEngine};
use crate::feed::CandleFeed;
use crate::ledger::{LedgerRecord, LedgerSink};
use crate::models::{Candle, Order, PositionSnapshot, PositionState};
use crate::transport::codec::OrderRequest;
use crate::{ReplayError, Result};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One client's replay run
///
/// Owns the feed (until the scheduler takes it) and the position engine.
/// The engine sits behind a mutex that is never held across an await, so the
/// scheduler and the order entry point are serialised against each other.
pub struct Session {
    id: Uuid,
    engine: Mutex<PositionEngine>,
    feed: Mutex<Option<CandleFeed>>,
    signal: AccountSignal,
    updates: Arc<tokio::sync::Mutex<AccountSignalReceiver>>,
    sink: Arc<dyn LedgerSink>,
    terminated: CancellationToken,
    flushed: Mutex<bool>,
}

impl Session {
    pub fn new(feed: CandleFeed, engine: PositionEngine, sink: Arc<dyn LedgerSink>) -> Self {
        let (signal, updates) = account_signal();
        Self {
            id: Uuid::new_v4(),
            engine: Mutex::new(engine),
            feed: Mutex::new(Some(feed)),
            signal,
            updates: Arc::new(tokio::sync::Mutex::new(updates)),
            sink,
            terminated: CancellationToken::new(),
            flushed: Mutex::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn engine(&self) -> MutexGuard<'_, PositionEngine> {
        match self.engine.lock() {
            Ok(engine) => engine,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hand the feed to the scheduler; `None` if a scheduler already has it
    pub fn take_feed(&self) -> Option<CandleFeed> {
        match self.feed.lock() {
            Ok(mut feed) => feed.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Receiver end of the account-update signal, shared by subscribers one at a time
    pub fn updates(&self) -> Arc<tokio::sync::Mutex<AccountSignalReceiver>> {
        self.updates.clone()
    }

    /// Execute a client market order against the current quote
    ///
    /// Returns the ledger id of the executed order.
    pub fn place_order(&self, request: &OrderRequest) -> Result<Uuid> {
        if self.is_terminated() {
            return Err(ReplayError::OrderRejected("replay session has ended".into()));
        }

        let order_id = {
            let mut engine = self.engine();
            engine.place_market_order(
                request.side,
                request.quantity,
                request.take_profit,
                request.stop_loss,
            )?;
            engine
                .ledger()
                .last()
                .map(|entry| entry.order_id)
                .unwrap_or_else(Uuid::nil)
        };

        self.signal.notify();
        Ok(order_id)
    }

    /// Run TP/SL against `candle`; raises the account signal when an exit fires
    pub fn evaluate_auto_exit(&self, candle: &Candle) -> Option<Order> {
        let exit = self.engine().evaluate_auto_exit(candle);
        if exit.is_some() {
            self.signal.notify();
        }
        exit
    }

    pub fn set_quote(&self, candle: Candle) {
        self.engine().set_quote(candle);
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        self.engine().snapshot()
    }

    pub fn position_state(&self) -> PositionState {
        self.engine().current_position_state()
    }

    pub fn ledger_len(&self) -> usize {
        self.engine().ledger().len()
    }

    /// Write the whole ledger to the sink, once per session
    pub fn flush_ledger(&self) {
        let mut flushed = match self.flushed.lock() {
            Ok(flushed) => flushed,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *flushed {
            return;
        }
        *flushed = true;

        let records: Vec<LedgerRecord> = self.engine().ledger().iter().map(LedgerRecord::from).collect();
        for record in &records {
            self.sink.append(record);
        }

        tracing::info!(session = %self.id, orders = records.len(), "Ledger flushed");
    }

    pub fn terminate(&self) {
        if !self.terminated.is_cancelled() {
            tracing::info!(session = %self.id, "Session terminated");
            self.terminated.cancel();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Resolves once the session has terminated
    pub async fn cancelled(&self) {
        self.terminated.cancelled().await
    }
}

/// Everything needed to start a fresh session
#[derive(Clone)]
pub struct SessionFactory {
    source: Arc<dyn HistoricalSource>,
    sink: Arc<dyn LedgerSink>,
    window: (i64, i64),
    fee_rate: Decimal,
}

impl SessionFactory {
    pub fn new(
        source: Arc<dyn HistoricalSource>,
        sink: Arc<dyn LedgerSink>,
        window: (i64, i64),
        fee_rate: Decimal,
    ) -> Self {
        Self {
            source,
            sink,
            window,
            fee_rate,
        }
    }

    pub fn create(&self) -> Session {
        let feed = CandleFeed::new(self.source.clone(), self.window.0, self.window.1);
        Session::new(feed, PositionEngine::new(self.fee_rate), self.sink.clone())
    }
}

/// Tracks the active session
///
/// A new session is created on demand once the previous one has terminated.
pub struct SessionManager {
    factory: SessionFactory,
    active: Mutex<Option<Arc<Session>>>,
}

impl SessionManager {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        match self.active.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The running session, or a new one
    pub fn acquire(&self) -> Arc<Session> {
        let mut slot = self.slot();
        if let Some(session) = slot.as_ref() {
            if !session.is_terminated() {
                return session.clone();
            }
        }

        let session = Arc::new(self.factory.create());
        tracing::info!(session = %session.id(), "Replay session created");
        *slot = Some(session.clone());
        session
    }

    /// The running session, if any
    pub fn active(&self) -> Option<Arc<Session>> {
        self.slot()
            .as_ref()
            .filter(|session| !session.is_terminated())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemorySource;
    use crate::ledger::MemorySink;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    fn candle(start_time: i64, open: Decimal) -> Candle {
        Candle {
            start_time,
            open,
            high: open,
            low: open,
            close: open,
            volume: dec!(1),
            turnover: open,
        }
    }

    fn factory(sink: Arc<MemorySink>) -> SessionFactory {
        let source = InMemorySource::new(vec![candle(0, dec!(100)), candle(1000, dec!(101))], 10);
        SessionFactory::new(Arc::new(source), sink, (0, 10_000), dec!(0.001))
    }

    fn buy(qty: Decimal) -> OrderRequest {
        OrderRequest {
            side: Side::Buy,
            quantity: qty,
            take_profit: Decimal::ZERO,
            stop_loss: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_rapid_orders_coalesce_into_latest_state() {
        let session = factory(Arc::new(MemorySink::new())).create();
        session.set_quote(candle(0, dec!(100)));

        session.place_order(&buy(dec!(1))).unwrap();
        session
            .place_order(&OrderRequest {
                side: Side::Sell,
                ..buy(dec!(1))
            })
            .unwrap();
        session.place_order(&buy(dec!(2))).unwrap();

        let updates = session.updates();
        let mut rx = updates.lock().await;
        assert!(rx.try_recv());
        assert!(!rx.try_recv());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.side, Some(Side::Buy));
        assert_eq!(snapshot.size, dec!(2));
    }

    #[test]
    fn test_rejected_order_does_not_signal() {
        let session = factory(Arc::new(MemorySink::new())).create();
        assert!(session.place_order(&buy(dec!(1))).is_err());

        let updates = session.updates();
        let mut rx = updates.try_lock().unwrap();
        assert!(!rx.try_recv());
    }

    #[test]
    fn test_flush_once() {
        let sink = Arc::new(MemorySink::new());
        let session = factory(sink.clone()).create();
        session.set_quote(candle(0, dec!(100)));
        session.place_order(&buy(dec!(1))).unwrap();

        session.flush_ledger();
        session.flush_ledger();
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_terminated_session_rejects_orders() {
        let session = factory(Arc::new(MemorySink::new())).create();
        session.set_quote(candle(0, dec!(100)));
        session.terminate();

        let result = session.place_order(&buy(dec!(1)));
        assert!(matches!(result, Err(ReplayError::OrderRejected(_))));
    }

    #[test]
    fn test_feed_taken_once() {
        let session = factory(Arc::new(MemorySink::new())).create();
        assert!(session.take_feed().is_some());
        assert!(session.take_feed().is_none());
    }

    #[test]
    fn test_manager_replaces_terminated_session() {
        let manager = SessionManager::new(factory(Arc::new(MemorySink::new())));
        assert!(manager.active().is_none());

        let first = manager.acquire();
        assert_eq!(manager.acquire().id(), first.id());
        assert_eq!(manager.active().unwrap().id(), first.id());

        first.terminate();
        assert!(manager.active().is_none());
        let second = manager.acquire();
        assert_ne!(second.id(), first.id());
    }
}
