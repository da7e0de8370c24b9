use super::{HistoricalSource, InMemorySource};
use crate::models::Candle;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketScenario {
    /// Drift up with noise
    Uptrend,
    /// Drift down with noise
    Downtrend,
    /// Mean-reverting around the base price
    #[default]
    Sideways,
    /// Large swings (±5%)
    Volatile,
}

/// Offline candle source backed by a seeded random walk
///
/// The whole window is generated up front so every page is reproducible
/// for a given seed.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    inner: InMemorySource,
}

impl SyntheticSource {
    pub fn new(seed: u64, scenario: MarketScenario, window: (i64, i64), interval_ms: i64, page_limit: usize) -> Self {
        let mut generator = SyntheticGenerator::new(seed);
        let candles = generator.generate(scenario, window.0, window.1, interval_ms);

        tracing::info!(
            seed,
            ?scenario,
            candles = candles.len(),
            "Generated synthetic replay window"
        );

        Self {
            inner: InMemorySource::new(candles, page_limit),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl HistoricalSource for SyntheticSource {
    async fn fetch_page(&self, start_ms: i64, end_ms: i64) -> anyhow::Result<Vec<Candle>> {
        self.inner.fetch_page(start_ms, end_ms).await
    }
}

struct SyntheticGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticGenerator {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
            base_volume: 1_000.0,
        }
    }

    fn generate(&mut self, scenario: MarketScenario, start_ms: i64, end_ms: i64, interval_ms: i64) -> Vec<Candle> {
        let interval_ms = interval_ms.max(1);
        let mut candles = Vec::new();
        let mut price = self.base_price;
        let mut start_time = start_ms;

        while start_time < end_ms {
            let step = match scenario {
                MarketScenario::Uptrend => 0.0005 + self.rng.gen_range(-0.001..0.001),
                MarketScenario::Downtrend => -0.0005 + self.rng.gen_range(-0.001..0.001),
                MarketScenario::Sideways => {
                    // Pull back towards the base price
                    let reversion = (self.base_price - price) / self.base_price * 0.05;
                    reversion + self.rng.gen_range(-0.002..0.002)
                }
                MarketScenario::Volatile => self.rng.gen_range(-0.05..0.05),
            };

            let open = price;
            price = (price * (1.0 + step)).max(0.01);
            candles.push(self.create_candle(start_time, open, price));
            start_time += interval_ms;
        }

        candles
    }

    fn create_candle(&mut self, start_time: i64, open: f64, close: f64) -> Candle {
        let noise_pct = 0.002;
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);
        let turnover = volume * close;

        Candle {
            start_time,
            open: to_decimal(open, 2),
            high: to_decimal(high, 2),
            low: to_decimal(low, 2),
            close: to_decimal(close, 2),
            volume: to_decimal(volume, 4),
            turnover: to_decimal(turnover, 4),
        }
    }
}

fn to_decimal(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(dp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_candles() {
        let a = SyntheticSource::new(42, MarketScenario::Volatile, (0, 60_000), 1_000, 100);
        let b = SyntheticSource::new(42, MarketScenario::Volatile, (0, 60_000), 1_000, 100);

        assert_eq!(a.len(), 60);
        assert_eq!(
            a.fetch_page(0, 60_000).await.unwrap(),
            b.fetch_page(0, 60_000).await.unwrap()
        );
    }

    #[test]
    fn test_ohlc_is_consistent() {
        let mut generator = SyntheticGenerator::new(7);
        for scenario in [
            MarketScenario::Uptrend,
            MarketScenario::Downtrend,
            MarketScenario::Sideways,
            MarketScenario::Volatile,
        ] {
            for candle in generator.generate(scenario, 0, 500_000, 1_000) {
                assert!(candle.high >= candle.open && candle.high >= candle.close);
                assert!(candle.low <= candle.open && candle.low <= candle.close);
                assert!(candle.low > Decimal::ZERO);
            }
        }
    }

    #[test]
    fn test_start_times_ascending_inside_window() {
        let mut generator = SyntheticGenerator::new(1);
        let candles = generator.generate(MarketScenario::Sideways, 5_000, 10_500, 1_000);

        let starts: Vec<i64> = candles.iter().map(|c| c.start_time).collect();
        assert_eq!(starts, vec![5_000, 6_000, 7_000, 8_000, 9_000, 10_000]);
    }
}
