use crate::feed::CandleFeed;
use crate::models::Candle;
use crate::session::Session;
use crate::transport::codec::MarketCodec;
use crate::{ReplayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Timing of the replay loop
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    /// Wall-clock time between ticks, independent of candle spacing
    pub tick_interval: Duration,
    /// Delay between the state update and the market event going out
    pub emit_latency: Duration,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(25),
            emit_latency: Duration::from_millis(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Draining,
    Terminated,
}

/// How a replay session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every candle in the window was replayed
    Exhausted,
    /// The client went away (or the session was cancelled)
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A market event for the candle starting at this time was emitted
    Emitted(i64),
    Terminated(SessionOutcome),
}

/// Drives one replay: advances the feed, runs TP/SL, emits market events
pub struct ReplayScheduler {
    feed: CandleFeed,
    session: Arc<Session>,
    codec: Arc<dyn MarketCodec>,
    out: mpsc::Sender<String>,
    settings: ReplaySettings,
    state: SchedulerState,
    outcome: Option<SessionOutcome>,
}

impl ReplayScheduler {
    pub fn new(
        feed: CandleFeed,
        session: Arc<Session>,
        codec: Arc<dyn MarketCodec>,
        out: mpsc::Sender<String>,
        settings: ReplaySettings,
    ) -> Self {
        Self {
            feed,
            session,
            codec,
            out,
            settings,
            state: SchedulerState::Running,
            outcome: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Publish the first candle as the pricing quote so orders can be placed
    /// before anything is emitted
    pub async fn prime(&mut self) {
        if self.feed.has_next().await {
            if let Some(candle) = self.feed.current() {
                self.session.set_quote(candle.clone());
            }
        }
    }

    /// Tick until the feed runs dry or the session is cancelled
    pub async fn run(mut self) -> SessionOutcome {
        tracing::info!(
            session = %self.session.id(),
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            "Replay started"
        );

        self.prime().await;

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let session = self.session.clone();
            tokio::select! {
                _ = session.cancelled() => {
                    if let TickOutcome::Terminated(outcome) = self.finish(SessionOutcome::TransportClosed) {
                        return outcome;
                    }
                }
                _ = ticker.tick() => {
                    if let TickOutcome::Terminated(outcome) = self.tick().await {
                        return outcome;
                    }
                }
            }
        }
    }

    /// One scheduler iteration
    pub async fn tick(&mut self) -> TickOutcome {
        if let Some(outcome) = self.outcome {
            return TickOutcome::Terminated(outcome);
        }
        if self.session.is_terminated() {
            return self.finish(SessionOutcome::TransportClosed);
        }

        if !self.feed.has_next().await {
            return self.finish(SessionOutcome::Exhausted);
        }

        // Exits are judged on the bar before it is shown to the client
        let current = match self.feed.current() {
            Some(candle) => candle.clone(),
            None => return self.finish(SessionOutcome::Exhausted),
        };
        if let Some(exit) = self.session.evaluate_auto_exit(&current) {
            tracing::info!(
                side = %exit.side,
                price = %exit.price,
                start_time = current.start_time,
                "Auto-exit triggered"
            );
        }

        let candle = match self.feed.next() {
            Ok(candle) => candle,
            Err(_) => return self.finish(SessionOutcome::Exhausted),
        };

        if !self.settings.emit_latency.is_zero() {
            sleep(self.settings.emit_latency).await;
        }

        match self.emit(&candle).await {
            Ok(()) => {}
            Err(ReplayError::TransportClosed) => {
                return self.finish(SessionOutcome::TransportClosed);
            }
            Err(e) => {
                tracing::warn!(start_time = candle.start_time, "Dropping market event: {}", e);
            }
        }

        if self.feed.has_next().await {
            if let Some(next) = self.feed.current() {
                self.session.set_quote(next.clone());
            }
        }

        TickOutcome::Emitted(candle.start_time)
    }

    async fn emit(&self, candle: &Candle) -> Result<()> {
        let message = self.codec.encode_market_event(candle)?;

        // A slow client must not keep a terminated session alive
        tokio::select! {
            sent = self.out.send(message) => sent.map_err(|_| ReplayError::TransportClosed),
            _ = self.session.cancelled() => Err(ReplayError::TransportClosed),
        }
    }

    fn finish(&mut self, outcome: SessionOutcome) -> TickOutcome {
        if self.state != SchedulerState::Terminated {
            self.state = SchedulerState::Draining;
            self.session.flush_ledger();
            self.session.terminate();
            self.state = SchedulerState::Terminated;
            self.outcome = Some(outcome);

            tracing::info!(
                session = %self.session.id(),
                ?outcome,
                replayed = self.feed.consumed(),
                "Replay finished"
            );
        }
        TickOutcome::Terminated(self.outcome.unwrap_or(outcome))
    }
}
