//! Deterministic market-data provider and decision oracle for integration
//! testing.
//!
//! Everything is in-memory and controllable from test code: prices can be
//! moved between cycles, a provider can be forced to fail, and every call
//! is counted.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use coinpilot::llm::DecisionEngine;
use coinpilot::market_data::MarketDataPort;
use coinpilot::types::{BotError, Coin, OhlcSample};

/// A mock market-data provider.
pub struct MockMarket {
    name: String,
    price: Mutex<Option<f64>>,
    coins: Vec<Coin>,
    history: Vec<OhlcSample>,
    pools: Value,
    /// If set, every call fails with a transient error carrying this message.
    force_error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockMarket {
    /// Provider quoting `price` with 30 rising daily closes and one deep pool.
    pub fn new(name: &str, price: Option<f64>) -> Self {
        let closes: Vec<f64> = (0..30).map(|i| 70.0 + i as f64).collect();
        Self {
            name: name.to_string(),
            price: Mutex::new(price),
            coins: Vec::new(),
            history: daily_candles(&closes),
            pools: deep_pools(),
            force_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider whose every call fails transiently.
    pub fn failing(name: &str, message: &str) -> Self {
        let market = Self::new(name, None);
        market.set_error(message);
        market
    }

    pub fn with_coins(mut self, coins: Vec<Coin>) -> Self {
        self.coins = coins;
        self
    }

    pub fn without_pools(mut self) -> Self {
        self.pools = Value::Null;
        self
    }

    pub fn set_price(&self, price: Option<f64>) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Total calls across all capabilities.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.force_error.lock().unwrap().as_ref() {
            Some(message) => Err(BotError::Transient {
                provider: self.name.clone(),
                message: message.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataPort for MockMarket {
    async fn get_price(&self, _coin_id: &str) -> Result<Option<f64>> {
        self.enter()?;
        Ok(*self.price.lock().unwrap())
    }

    async fn get_historic_ohlc(
        &self,
        _coin_id: &str,
        _vs_currency: &str,
        _days: u32,
        _interval: &str,
    ) -> Result<Vec<OhlcSample>> {
        self.enter()?;
        Ok(self.history.clone())
    }

    async fn get_coins(&self) -> Result<Vec<Coin>> {
        self.enter()?;
        Ok(self.coins.clone())
    }

    async fn search_pools(&self, _query: &str, _chain: Option<&str>) -> Result<Value> {
        self.enter()?;
        Ok(self.pools.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Oracle that replays scripted answers, then repeats a default.
pub struct ScriptedOracle {
    answers: Mutex<VecDeque<String>>,
    default: String,
    contexts: Mutex<Vec<Value>>,
}

impl ScriptedOracle {
    pub fn new(answers: &[&str], default: &str) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            default: default.to_string(),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(answer: &str) -> Self {
        Self::new(&[], answer)
    }

    /// Every context the oracle was asked about, in order.
    pub fn contexts(&self) -> Vec<Value> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionEngine for ScriptedOracle {
    async fn get_recommendation(&self, context: &Value, _instructions: &str) -> String {
        self.contexts.lock().unwrap().push(context.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// A coin with a price change, as the refresh worker would store it.
pub fn coin(coin_id: &str, symbol: &str, price_change: f64) -> Coin {
    let mut coin = Coin::new(coin_id, symbol);
    coin.price_change = price_change;
    coin
}

/// One daily candle per close, starting 2024-01-01.
pub fn daily_candles(closes: &[f64]) -> Vec<OhlcSample> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| OhlcSample::flat(start + Duration::days(i as i64), c))
        .collect()
}

/// Onchain pool search payload with a single deep pool.
pub fn deep_pools() -> Value {
    json!({
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
