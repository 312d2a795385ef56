//! CoinGecko market-data adapter.
//!
//! API docs: https://docs.coingecko.com/reference/introduction
//! Auth: optional demo key sent as `x-cg-demo-api-key`.
//!
//! The `/coins/{id}/ohlc` endpoint picks its own granularity from `days`
//! (up to 2 days → 30-minute candles, up to 30 days → 4-hour, beyond →
//! 4-day), so `"daily"` history is read from `/coins/{id}/market_chart`
//! with `interval=daily` instead, one flat sample per daily close.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::retry::status_error;
use super::MarketDataPort;
use crate::config::AppConfig;
use crate::types::{Coin, OhlcSample};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PROVIDER_NAME: &str = "coingecko";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// One entry of `/coins/markets`. Only the fields we use.
#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    symbol: String,
    #[serde(default)]
    current_price: Option<f64>,
    #[serde(default)]
    price_change_percentage_1h_in_currency: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct CoinGeckoClient {
    http: Client,
    root: String,
    api_key: Option<SecretString>,
    coins_per_page: u32,
}

impl CoinGeckoClient {
    pub fn new(
        root: &str,
        api_key: Option<SecretString>,
        coins_per_page: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("coinpilot/0.1.0")
            .build()
            .context("Failed to build HTTP client for CoinGecko")?;

        Ok(Self {
            http,
            root: root.trim_end_matches('/').to_string(),
            api_key,
            coins_per_page,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = AppConfig::resolve_secret(config.coingecko.api_key_env.as_deref());
        if api_key.is_none() {
            info!("No CoinGecko API key configured, using public rate limits");
        }
        Self::new(
            &config.coingecko.api_root,
            api_key,
            config.coingecko.coins_per_page,
            Duration::from_secs(config.api.request_timeout_secs),
        )
    }

    /// GET `{root}{path}` and decode the JSON body.
    ///
    /// Non-success statuses become classified `BotError`s so the gateway's
    /// retry policy can tell 429/5xx from permanent failures.
    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.root, path);
        debug!(url = %url, "CoinGecko request");

        let mut request = self.http.get(&url).header("accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key.expose_secret());
        }

        let started = std::time::Instant::now();
        let resp = request.send().await.context("CoinGecko request failed")?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER_NAME, resp).await.into());
        }

        let body = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse CoinGecko response from {path}"))?;
        debug!(
            path,
            duration_ms = started.elapsed().as_millis() as u64,
            "CoinGecko call successful"
        );
        Ok(body)
    }

    fn parse_price(body: &Value, coin_id: &str) -> Option<f64> {
        body.get(coin_id)?.get("usd")?.as_f64()
    }

    /// `[[ts_ms, open, high, low, close], ...]` → samples, skipping bad rows.
    fn parse_ohlc(body: &Value) -> Vec<OhlcSample> {
        let Some(rows) = body.as_array() else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                if row.len() < 5 {
                    return None;
                }
                let ts = Utc.timestamp_millis_opt(row[0].as_i64()?).single()?;
                Some(OhlcSample {
                    timestamp: ts,
                    open: row[1].as_f64()?,
                    high: row[2].as_f64()?,
                    low: row[3].as_f64()?,
                    close: row[4].as_f64()?,
                })
            })
            .collect()
    }

    /// `{"prices": [[ts_ms, price], ...]}` → flat samples, skipping bad rows.
    fn parse_market_chart(body: &Value) -> Vec<OhlcSample> {
        let Some(rows) = body.get("prices").and_then(Value::as_array) else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                let ts = Utc.timestamp_millis_opt(row.first()?.as_i64()?).single()?;
                Some(OhlcSample::flat(ts, row.get(1)?.as_f64()?))
            })
            .collect()
    }

    fn to_coin(entry: MarketEntry, now: chrono::DateTime<Utc>) -> Coin {
        let mut coin = Coin::new(entry.id, entry.symbol.to_uppercase());
        coin.price_change = entry.price_change_percentage_1h_in_currency.unwrap_or(0.0);
        if let Some(price) = entry.current_price {
            coin.prices.push(OhlcSample::flat(now, price));
        }
        coin
    }
}

// ---------------------------------------------------------------------------
// MarketDataPort implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataPort for CoinGeckoClient {
    async fn get_price(&self, coin_id: &str) -> Result<Option<f64>> {
        let path = format!(
            "/simple/price?ids={}&vs_currencies=usd",
            urlencoding::encode(coin_id)
        );
        let body = self.get_json(&path).await?;
        Ok(Self::parse_price(&body, coin_id))
    }

    async fn get_historic_ohlc(
        &self,
        coin_id: &str,
        vs_currency: &str,
        days: u32,
        interval: &str,
    ) -> Result<Vec<OhlcSample>> {
        debug!(coin_id, days, interval, "Fetching CoinGecko OHLC");
        let daily = interval == "daily";
        let endpoint = if daily { "market_chart" } else { "ohlc" };
        let mut path = format!(
            "/coins/{}/{endpoint}?vs_currency={}&days={}",
            urlencoding::encode(coin_id),
            urlencoding::encode(vs_currency),
            days
        );
        if daily {
            path.push_str("&interval=daily");
        }
        let body = self.get_json(&path).await?;
        if daily {
            Ok(Self::parse_market_chart(&body))
        } else {
            Ok(Self::parse_ohlc(&body))
        }
    }

    async fn get_coins(&self) -> Result<Vec<Coin>> {
        let path = format!(
            "/coins/markets?order=market_cap_desc&per_page={}&vs_currency=usd&price_change_percentage=1h",
            self.coins_per_page
        );
        let body = self.get_json(&path).await?;
        let entries: Vec<MarketEntry> =
            serde_json::from_value(body).context("Unexpected /coins/markets payload")?;

        let now = Utc::now();
        let coins: Vec<Coin> = entries.into_iter().map(|e| Self::to_coin(e, now)).collect();
        info!(count = coins.len(), "Fetched top coins from CoinGecko");
        Ok(coins)
    }

    async fn search_pools(&self, query: &str, chain: Option<&str>) -> Result<Value> {
        let mut path = format!("/onchain/search/pools?query={}", urlencoding::encode(query));
        if let Some(chain) = chain {
            path.push_str(&format!("&chain={}", urlencoding::encode(chain)));
        }
        self.get_json(&path).await
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
