use crate::api::HistoricalSource;
use crate::models::Candle;
use crate::{ReplayError, Result};
use std::sync::Arc;

/// Forward-only cursor over a window of historical candles
///
/// Candles are pulled from the upstream source one page at a time. The
/// cursor never moves backwards, and once the feed reports exhaustion it
/// stays exhausted.
pub struct CandleFeed {
    source: Arc<dyn HistoricalSource>,
    window_start: i64,
    window_end: i64,
    buffer: Vec<Candle>,
    position: usize,
    exhausted: bool,
}

impl CandleFeed {
    /// Create a feed over `[window_start, window_end)`
    ///
    /// Nothing is fetched until the first `has_next()`.
    pub fn new(source: Arc<dyn HistoricalSource>, window_start: i64, window_end: i64) -> Self {
        Self {
            source,
            window_start,
            window_end,
            buffer: Vec::new(),
            position: 0,
            exhausted: window_start >= window_end,
        }
    }

    pub fn window(&self) -> (i64, i64) {
        (self.window_start, self.window_end)
    }

    /// Number of candles handed out by `next()` so far
    pub fn consumed(&self) -> usize {
        self.position
    }

    /// True while a candle is available at the cursor
    ///
    /// Refills from upstream when the buffer is drained.
    pub async fn has_next(&mut self) -> bool {
        if self.position < self.buffer.len() {
            return true;
        }
        if self.exhausted {
            return false;
        }

        self.refill().await;
        self.position < self.buffer.len()
    }

    /// Candle at the cursor, without advancing
    pub fn current(&self) -> Option<&Candle> {
        self.buffer.get(self.position)
    }

    /// Return the candle at the cursor and advance past it
    ///
    /// Callers must check `has_next()` first; a drained buffer yields
    /// `FeedExhausted` without touching upstream.
    pub fn next(&mut self) -> Result<Candle> {
        let candle = self
            .buffer
            .get(self.position)
            .cloned()
            .ok_or(ReplayError::FeedExhausted)?;
        self.position += 1;
        Ok(candle)
    }

    async fn refill(&mut self) {
        let next_start = match self.buffer.last() {
            Some(last) => last.start_time + 1,
            None => self.window_start,
        };

        if next_start >= self.window_end {
            self.mark_exhausted("window end reached");
            return;
        }

        let page = match self.source.fetch_page(next_start, self.window_end).await {
            Ok(page) => page,
            Err(e) => {
                let err = ReplayError::UpstreamFetchFailed(format!("{:#}", e));
                tracing::error!(next_start, error = %err, "Kline fetch failed, ending feed");
                self.mark_exhausted("upstream fetch failed");
                return;
            }
        };

        let page = prepare_page(page, self.buffer.last().map(|c| c.start_time), self.window_end);
        if page.is_empty() {
            self.mark_exhausted("empty page");
            return;
        }

        tracing::debug!(
            next_start,
            added = page.len(),
            buffered = self.buffer.len() + page.len(),
            "Feed refilled"
        );
        self.buffer.extend(page);
    }

    fn mark_exhausted(&mut self, reason: &str) {
        self.exhausted = true;
        tracing::info!(
            reason,
            replayed = self.position,
            window_start = self.window_start,
            window_end = self.window_end,
            "Candle feed exhausted"
        );
    }
}

/// Turn an upstream page (newest-first) into ascending candles that extend
/// the buffer: reversed, sorted if needed, cut at `window_end`, and
/// stripped of anything at or before the last buffered start time.
fn prepare_page(mut page: Vec<Candle>, last_start: Option<i64>, window_end: i64) -> Vec<Candle> {
    page.reverse();
    if !page.windows(2).all(|w| w[0].start_time < w[1].start_time) {
        page.sort_by_key(|c| c.start_time);
        page.dedup_by_key(|c| c.start_time);
    }

    page.truncate(truncation_index(&page, window_end));

    if let Some(last_start) = last_start {
        let keep_from = page.partition_point(|c| c.start_time <= last_start);
        page.drain(..keep_from);
    }

    page
}

/// First index whose start time is at or after `window_end`
///
/// `candles` must be ascending by start time.
pub fn truncation_index(candles: &[Candle], window_end: i64) -> usize {
    let (mut lo, mut hi) = (0, candles.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if candles[mid].start_time < window_end {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
