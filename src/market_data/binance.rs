//! Binance spot market-data adapter (public endpoints only).
//!
//! Base URL: https://api.binance.com
//! Coins are addressed as `{SYMBOL}{QUOTE}` pairs, e.g. `BTCUSDT`.
//! Binance has no liquidity-pool search; `search_pools` reports
//! `BotError::Unsupported` so the gateway moves on immediately.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::retry::status_error;
use super::MarketDataPort;
use crate::config::AppConfig;
use crate::types::{BotError, Coin, OhlcSample};

const PROVIDER_NAME: &str = "binance";

/// Binance caps `/klines` at 1000 rows per request.
const MAX_KLINES: u32 = 1000;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    #[serde(default)]
    price_change_percent: String,
    #[serde(default)]
    quote_volume: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceClient {
    http: Client,
    root: String,
    quote_asset: String,
    max_coins: usize,
}

impl BinanceClient {
    pub fn new(root: &str, quote_asset: &str, max_coins: usize, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("coinpilot/0.1.0")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            root: root.trim_end_matches('/').to_string(),
            quote_asset: quote_asset.to_uppercase(),
            max_coins,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            &config.binance.api_root,
            &config.binance.quote_asset,
            config.binance.max_coins,
            Duration::from_secs(config.api.request_timeout_secs),
        )
    }

    fn pair(&self, coin_id: &str) -> String {
        format!("{}{}", coin_id.to_uppercase(), self.quote_asset)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.root, path);
        debug!(url = %url, "Binance request");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Binance request failed")?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER_NAME, resp).await.into());
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Binance response from {path}"))
    }

    /// Map engine interval names to Binance kline intervals and row counts.
    fn kline_params(interval: &str, days: u32) -> (&str, u32) {
        let (code, per_day) = match interval {
            "hourly" | "1h" => ("1h", 24),
            "daily" | "1d" => ("1d", 1),
            "4h" => ("4h", 6),
            other => (other, 24),
        };
        (code, days.saturating_mul(per_day).clamp(1, MAX_KLINES))
    }

    /// Kline rows carry prices as strings: `[open_time, "o", "h", "l", "c", ...]`.
    fn parse_klines(rows: &[Value]) -> Vec<OhlcSample> {
        let num = |v: &Value| v.as_str().and_then(|s| s.parse::<f64>().ok());
        rows.iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                if row.len() < 5 {
                    return None;
                }
                Some(OhlcSample {
                    timestamp: Utc.timestamp_millis_opt(row[0].as_i64()?).single()?,
                    open: num(&row[1])?,
                    high: num(&row[2])?,
                    low: num(&row[3])?,
                    close: num(&row[4])?,
                })
            })
            .collect()
    }

    /// Keep `*QUOTE` pairs, rank by quote volume and convert to coins.
    fn top_coins(&self, tickers: Vec<Ticker24h>) -> Vec<Coin> {
        let now = Utc::now();
        let mut ranked: Vec<(f64, Coin)> = tickers
            .into_iter()
            .filter_map(|t| {
                let base = t.symbol.strip_suffix(&self.quote_asset)?;
                if base.is_empty() {
                    return None;
                }
                let price: f64 = t.last_price.parse().ok()?;
                let mut coin = Coin::new(base.to_lowercase(), base.to_uppercase());
                coin.price_change = t.price_change_percent.parse().unwrap_or(0.0);
                coin.prices.push(OhlcSample::flat(now, price));
                Some((t.quote_volume.parse().unwrap_or(0.0), coin))
            })
            .collect();

        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked
            .into_iter()
            .take(self.max_coins)
            .map(|(_, coin)| coin)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MarketDataPort implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataPort for BinanceClient {
    async fn get_price(&self, coin_id: &str) -> Result<Option<f64>> {
        let path = format!("/api/v3/ticker/price?symbol={}", self.pair(coin_id));
        let ticker: TickerPrice = self.get_json(&path).await?;
        Ok(ticker.price.parse().ok())
    }

    async fn get_historic_ohlc(
        &self,
        coin_id: &str,
        _vs_currency: &str,
        days: u32,
        interval: &str,
    ) -> Result<Vec<OhlcSample>> {
        let (code, limit) = Self::kline_params(interval, days);
        let path = format!(
            "/api/v3/klines?symbol={}&interval={}&limit={}",
            self.pair(coin_id),
            code,
            limit
        );
        let rows: Vec<Value> = self.get_json(&path).await?;
        Ok(Self::parse_klines(&rows))
    }

    async fn get_coins(&self) -> Result<Vec<Coin>> {
        let tickers: Vec<Ticker24h> = self.get_json("/api/v3/ticker/24hr").await?;
        let coins = self.top_coins(tickers);
        info!(count = coins.len(), quote = %self.quote_asset, "Fetched top pairs from Binance");
        Ok(coins)
    }

    async fn search_pools(&self, _query: &str, _chain: Option<&str>) -> Result<Value> {
        Err(BotError::Unsupported {
            provider: PROVIDER_NAME.to_string(),
            capability: "search_pools",
        }
        .into())
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
