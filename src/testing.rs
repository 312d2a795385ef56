//! Test doubles shared by unit tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use mockall::mock;
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

use crate::llm::DecisionEngine;
use crate::market_data::MarketDataPort;
use crate::types::{Coin, OhlcSample};

mock! {
    pub Oracle {}

    #[async_trait]
    impl DecisionEngine for Oracle {
        async fn get_recommendation(&self, context: &Value, instructions: &str) -> String;
    }
}

/// Oracle mock that always answers `text`.
pub fn oracle_saying(text: &'static str) -> MockOracle {
    let mut oracle = MockOracle::new();
    oracle
        .expect_get_recommendation()
        .returning(move |_, _| text.to_string());
    oracle
}

/// Market data with fixed answers. Prices can be changed between calls.
pub struct StaticMarket {
    pub price: Mutex<Option<f64>>,
    pub pools: Value,
    pub history: Vec<OhlcSample>,
    pub coins: Vec<Coin>,
}

impl StaticMarket {
    pub fn new(price: Option<f64>) -> Self {
        Self {
            price: Mutex::new(price),
            pools: Value::Null,
            history: Vec::new(),
            coins: Vec::new(),
        }
    }

    pub fn with_pools(mut self, pools: Value) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_history(mut self, history: Vec<OhlcSample>) -> Self {
        self.history = history;
        self
    }

    pub fn with_coins(mut self, coins: Vec<Coin>) -> Self {
        self.coins = coins;
        self
    }

    pub fn set_price(&self, price: Option<f64>) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl MarketDataPort for StaticMarket {
    async fn get_price(&self, _coin_id: &str) -> Result<Option<f64>> {
        Ok(*self.price.lock().unwrap())
    }

    async fn get_historic_ohlc(
        &self,
        _coin_id: &str,
        _vs_currency: &str,
        _days: u32,
        _interval: &str,
    ) -> Result<Vec<OhlcSample>> {
        Ok(self.history.clone())
    }

    async fn get_coins(&self) -> Result<Vec<Coin>> {
        Ok(self.coins.clone())
    }

    async fn search_pools(&self, _query: &str, _chain: Option<&str>) -> Result<Value> {
        Ok(self.pools.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// One daily candle per close, starting 2024-01-01.
pub fn daily_history(closes: &[f64]) -> Vec<OhlcSample> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| OhlcSample::flat(start + Duration::days(i as i64), c))
        .collect()
}

/// `{"data": [pool]}` with one pool comfortably above default thresholds.
pub fn deep_pool_payload() -> Value {
    serde_json::json!({
        "data": [{
            "attributes": {
                "name": "BTC / USDC",
                "reserve_in_usd": "5000000",
                "volume_usd": {"h24": "2500000"},
                "transactions": {"h24": {"buys": 900, "sells": 850}}
            }
        }]
    })
}

/// In-memory log sink. Install with `tracing::subscriber::set_default`
/// inside a single-threaded test.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
