use super::HistoricalSource;
use crate::models::{Candle, KlineInterval};
use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

pub const BYBIT_API_BASE: &str = "https://api.bybit.com";
const KLINE_PATH: &str = "/v5/market/kline";
const DEFAULT_PAGE_LIMIT: u32 = 200;
const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

type KlineRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Bybit v5 market kline client
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct BybitKlineClient {
    client: Client,
    base_url: String,
    category: String,
    symbol: String,
    interval: KlineInterval,
    page_limit: u32,
    rate_limiter: Arc<KlineRateLimiter>,
}

/// Envelope of every v5 REST response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KlineResponse {
    ret_code: i64,
    ret_msg: String,
    #[serde(default)]
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

impl BybitKlineClient {
    pub fn new(
        base_url: impl Into<String>,
        category: impl Into<String>,
        symbol: impl Into<String>,
        interval: KlineInterval,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            category: category.into(),
            symbol: symbol.into(),
            interval,
            page_limit: DEFAULT_PAGE_LIMIT,
            rate_limiter: Arc::new(Self::limiter(DEFAULT_REQUESTS_PER_SECOND)),
        })
    }

    /// Bars per request (Bybit caps this at 1000)
    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.clamp(1, 1000);
        self
    }

    pub fn with_requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.rate_limiter = Arc::new(Self::limiter(requests_per_second));
        self
    }

    fn limiter(requests_per_second: u32) -> KlineRateLimiter {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_second(rps))
    }

    /// Fetch one page of klines starting at `start_ms`.
    ///
    /// Only `start` and `limit` are sent: with both `start` and `end` Bybit
    /// answers the bars nearest to `end`, which would skip data between pages.
    async fn get_klines(&self, start_ms: i64) -> Result<Vec<Candle>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, KLINE_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("category", self.category.clone()),
                ("symbol", self.symbol.clone()),
                ("interval", self.interval.to_string()),
                ("start", start_ms.to_string()),
                ("limit", self.page_limit.to_string()),
            ])
            .send()
            .await
            .context("Kline request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Bybit API error ({}): {}", status, body);
        }

        let body: KlineResponse = response
            .json()
            .await
            .context("Failed to parse kline response")?;

        if body.ret_code != 0 {
            anyhow::bail!("Bybit retCode {}: {}", body.ret_code, body.ret_msg);
        }

        let rows = body.result.map(|r| r.list).unwrap_or_default();
        rows.iter().map(|row| parse_row(row)).collect()
    }
}

#[async_trait]
impl HistoricalSource for BybitKlineClient {
    async fn fetch_page(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Candle>> {
        let page = self.get_klines(start_ms).await?;
        tracing::debug!(
            symbol = %self.symbol,
            start_ms,
            end_ms,
            bars = page.len(),
            "Fetched kline page"
        );
        Ok(page)
    }
}

/// Parse `[start, open, high, low, close, volume, turnover]`
fn parse_row(row: &[String]) -> Result<Candle> {
    if row.len() < 7 {
        anyhow::bail!("kline row has {} fields, expected 7", row.len());
    }

    let decimal = |idx: usize, name: &str| {
        Decimal::from_str(&row[idx]).with_context(|| format!("bad {} '{}'", name, row[idx]))
    };

    Ok(Candle {
        start_time: row[0]
            .parse()
            .with_context(|| format!("bad start time '{}'", row[0]))?,
        open: decimal(1, "open")?,
        high: decimal(2, "high")?,
        low: decimal(3, "low")?,
        close: decimal(4, "close")?,
        volume: decimal(5, "volume")?,
        turnover: decimal(6, "turnover")?,
    })
}
