//! Shared types for the COINPILOT engine.
//!
//! These types form the data model used across all modules. Storage,
//! market-data, strategy and engine modules depend on them without
//! depending on each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Coin
// ---------------------------------------------------------------------------

/// One OHLC candle. Samples are stored in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcSample {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl OhlcSample {
    /// A flat candle where open/high/low/close are all `price`.
    /// Used for single spot-price samples from market listings.
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// A tradable asset tracked by symbol and provider-specific identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    /// Provider identifier, e.g. `"bitcoin"` on CoinGecko.
    pub coin_id: String,
    /// Display symbol, e.g. `"BTC"`.
    pub symbol: String,
    /// Last realized PnL percentage (overwritten on each exit).
    #[serde(default)]
    pub realized_pnl: f64,
    /// Price change percentage over the provider's reporting window.
    #[serde(default)]
    pub price_change: f64,
    #[serde(default)]
    pub prices: Vec<OhlcSample>,
}

impl Coin {
    pub fn new(coin_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            coin_id: coin_id.into(),
            symbol: symbol.into(),
            realized_pnl: 0.0,
            price_change: 0.0,
            prices: Vec::new(),
        }
    }

    /// Most recent close, if any history is stored.
    pub fn last_close(&self) -> Option<f64> {
        self.prices.last().map(|p| p.close)
    }

    /// Compact view of the coin sent to the decision engine.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "coinId": self.coin_id,
            "symbol": self.symbol,
            "realizedPnl": self.realized_pnl,
            "priceChange": self.price_change,
            "lastClose": self.last_close(),
            "samples": self.prices.len(),
        })
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) change: {:+.2}% | realized: {:+.2}%",
            self.symbol, self.coin_id, self.price_change, self.realized_pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Direction::Buy),
            "SELL" => Ok(Direction::Sell),
            _ => Err(BotError::Storage(format!("Unknown order direction: {s}"))),
        }
    }
}

/// A simulated (paper) order. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    pub symbol: String,
    pub direction: Direction,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} x{} @ ${:.4} ({})",
            self.direction,
            self.symbol,
            self.quantity,
            self.price,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Mark-to-market snapshot appended once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlEntry {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Aggregated holding for one symbol.
///
/// `total_quantity` only ever grows: exits are recorded in the order ledger
/// but do not reduce the aggregated quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub cost_basis: f64,
    pub total_quantity: f64,
    #[serde(default)]
    pub pnl_history: Vec<PnlEntry>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, cost_basis: f64, total_quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            cost_basis,
            total_quantity,
            pnl_history: Vec::new(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} qty: {} @ basis ${:.4} ({} snapshots)",
            self.symbol,
            self.total_quantity,
            self.cost_basis,
            self.pnl_history.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Liquidity pools
// ---------------------------------------------------------------------------

/// A liquidity pool snapshot. Produced per evaluation, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reserve_usd: f64,
    pub volume_24h_usd: f64,
    pub buys_24h: f64,
}

impl LiquidityPool {
    /// Parse one pool entry from a provider payload.
    ///
    /// Accepts both the flat shape (`reserve_in_usd`, `volume_in_usd.h24`,
    /// `buys_24h`) and the CoinGecko on-chain shape where the same figures
    /// live under `attributes` (`volume_usd.h24`, `transactions.h24.buys`).
    /// Numbers may be JSON numbers or numeric strings; anything missing or
    /// unparseable reads as zero. Returns `None` for non-object entries.
    pub fn from_payload(entry: &Value) -> Option<Self> {
        let obj = entry.as_object()?;
        let attrs = obj
            .get("attributes")
            .filter(|a| a.is_object())
            .unwrap_or(entry);

        let reserve_usd = number(attrs.get("reserve_in_usd"));
        let volume_24h_usd = attrs
            .get("volume_in_usd")
            .or_else(|| attrs.get("volume_usd"))
            .map(|v| number(v.get("h24")))
            .unwrap_or(0.0);
        let buys_24h = match attrs.get("buys_24h") {
            Some(v) => number(Some(v)),
            None => number(
                attrs
                    .get("transactions")
                    .and_then(|t| t.get("h24"))
                    .and_then(|h| h.get("buys")),
            ),
        };
        let name = attrs
            .get("name")
            .and_then(Value::as_str)
            .map(String::from);

        Some(Self {
            name,
            reserve_usd,
            volume_24h_usd,
            buys_24h,
        })
    }

    /// Parse every pool in a `{"data": [...]}` search payload.
    pub fn parse_search(payload: &Value) -> Vec<Self> {
        payload
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Self::from_payload).collect())
            .unwrap_or_default()
    }
}

fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for COINPILOT.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Network failures, timeouts, rate limits and 5xx responses.
    #[error("Transient error ({provider}): {message}")]
    Transient { provider: String, message: String },

    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: &'static str,
    },

    #[error("Could not load {kind} plugin '{class}' from '{module}' (version: {version:?})")]
    PluginNotFound {
        kind: &'static str,
        module: String,
        class: String,
        version: Option<String>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BotError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BotError::Transient { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
