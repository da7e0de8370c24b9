pub mod bybit;
pub mod synthetic;

pub use bybit::BybitKlineClient;
pub use synthetic::{MarketScenario, SyntheticSource};

use crate::models::Candle;
use async_trait::async_trait;

/// Upstream source of historical candles
///
/// Pages are returned newest-first, the way exchange kline endpoints answer.
/// Errors are not retried by the caller.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch_page(&self, start_ms: i64, end_ms: i64) -> anyhow::Result<Vec<Candle>>;
}

/// Serves a fixed candle set in exchange-style pages
///
/// Each page holds at most `page_limit` candles with `start_ms <= start_time <= end_ms`,
/// taken from the oldest end and handed back newest-first.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    candles: Vec<Candle>,
    page_limit: usize,
}

impl InMemorySource {
    pub fn new(mut candles: Vec<Candle>, page_limit: usize) -> Self {
        candles.sort_by_key(|c| c.start_time);
        Self {
            candles,
            page_limit: page_limit.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[async_trait]
impl HistoricalSource for InMemorySource {
    async fn fetch_page(&self, start_ms: i64, end_ms: i64) -> anyhow::Result<Vec<Candle>> {
        let mut page: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.start_time >= start_ms && c.start_time <= end_ms)
            .take(self.page_limit)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }
}
