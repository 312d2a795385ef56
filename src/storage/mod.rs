//! Persistence layer.
//!
//! Defines the `DataStorage` trait over coins, the paper-order ledger and
//! the portfolio, plus four backends:
//! - `JsonStorage`: three JSON files (coins, orders, portfolio)
//! - `SqliteStorage`: sqlx/SQLite, schema created on connect
//! - `MemoryStorage`: process-local, used by tests and isolated shadow mode
//! - `ShadowLedger`: live coin data with a private order/portfolio ledger
//!
//! Individual operations are serialised by each backend. Multi-step
//! sequences (create-or-update position, then insert order) are not atomic.

pub mod json;
pub mod ledger;
pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::types::{BotError, Coin, Direction, OhlcSample, Order, PnlEntry, Position};

pub use json::JsonStorage;
pub use ledger::ShadowLedger;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Storage port used by the engine, strategies and refresh worker.
///
/// Lookups of absent records return `Ok(None)`; `Err` is reserved for
/// backend failures.
#[async_trait]
pub trait DataStorage: Send + Sync {
    // -- Coins -----------------------------------------------------------

    async fn get_all_coins(&self) -> Result<Vec<Coin>>;

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>>;

    /// Insert a coin with its initial price history.
    /// Returns `None` if the symbol is already stored.
    async fn add_coin(&self, coin: &Coin) -> Result<Option<Coin>>;

    /// Append samples newer than the last stored one. Returns how many were
    /// kept, or `None` if the coin does not exist.
    async fn append_prices(&self, symbol: &str, samples: &[OhlcSample]) -> Result<Option<usize>>;

    /// Returns `false` if the coin does not exist.
    async fn update_price_change(&self, symbol: &str, price_change: f64) -> Result<bool>;

    /// Overwrite the coin's last realized PnL. Returns `false` if absent.
    async fn update_realized_pnl(&self, symbol: &str, realized_pnl: f64) -> Result<bool>;

    // -- Orders ----------------------------------------------------------

    async fn get_all_orders(&self, direction: Option<Direction>) -> Result<Vec<Order>>;

    async fn insert_order(&self, order: &Order) -> Result<()>;

    // -- Portfolio -------------------------------------------------------

    async fn get_all_positions(&self) -> Result<Vec<Position>>;

    async fn get_position_by_symbol(&self, symbol: &str) -> Result<Option<Position>>;

    /// Create a position. Fails if one already exists for the symbol.
    async fn insert_position(
        &self,
        symbol: &str,
        cost_basis: f64,
        total_quantity: f64,
    ) -> Result<Position>;

    /// Set the cost basis and add `additional_qty` to the total quantity.
    async fn update_position_by_symbol(
        &self,
        symbol: &str,
        cost_basis: f64,
        additional_qty: f64,
    ) -> Result<Option<Position>>;

    /// Returns `None` if there is no position for the symbol.
    async fn append_pnl_entry(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<Option<PnlEntry>>;
}

/// Build the configured storage backend.
pub async fn build_storage(config: &AppConfig) -> Result<Arc<dyn DataStorage>> {
    let backend = config.providers.storage.to_lowercase();
    let storage: Arc<dyn DataStorage> = match backend.as_str() {
        "json" => Arc::new(JsonStorage::new(
            &config.storage.coins_file,
            &config.storage.orders_file,
            &config.storage.portfolio_file,
        )),
        "sqlite" => Arc::new(SqliteStorage::connect(&config.storage.sqlite_url).await?),
        "memory" => Arc::new(MemoryStorage::new()),
        other => {
            return Err(BotError::Config(format!("Unknown storage provider: {other}")).into());
        }
    };
    info!(backend = %backend, "Storage ready");
    Ok(storage)
}

// ---------------------------------------------------------------------------
// Shared record operations
// ---------------------------------------------------------------------------
//
// Backends that keep whole collections in memory (JSON, in-memory) apply
// these to their vectors so the semantics stay identical.

pub(crate) fn validate_order(order: &Order) -> Result<()> {
    if order.quantity.is_nan() || order.quantity <= 0.0 {
        return Err(BotError::Storage(format!(
            "Order quantity must be positive (got {} for {})",
            order.quantity, order.symbol
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn add_coin_to(coins: &mut Vec<Coin>, coin: &Coin) -> Option<Coin> {
    if coins.iter().any(|c| c.symbol == coin.symbol) {
        return None;
    }
    let mut stored = coin.clone();
    stored.prices.clear();
    merge_samples(&mut stored.prices, &coin.prices);
    coins.push(stored.clone());
    Some(stored)
}

/// Append samples that are not older than the last stored one, keeping
/// the history in chronological order. Returns the number appended.
pub(crate) fn merge_samples(history: &mut Vec<OhlcSample>, samples: &[OhlcSample]) -> usize {
    let mut incoming: Vec<OhlcSample> = samples.to_vec();
    incoming.sort_by_key(|s| s.timestamp);

    let mut appended = 0;
    for sample in incoming {
        if history.last().is_some_and(|last| sample.timestamp < last.timestamp) {
            continue;
        }
        history.push(sample);
        appended += 1;
    }
    appended
}

pub(crate) fn filter_orders(orders: &[Order], direction: Option<Direction>) -> Vec<Order> {
    orders
        .iter()
        .filter(|o| direction.map_or(true, |d| o.direction == d))
        .cloned()
        .collect()
}

pub(crate) fn insert_position_into(
    positions: &mut Vec<Position>,
    symbol: &str,
    cost_basis: f64,
    total_quantity: f64,
) -> Result<Position> {
    if positions.iter().any(|p| p.symbol == symbol) {
        return Err(BotError::Storage(format!("Position already exists for {symbol}")).into());
    }
    let position = Position::new(symbol, cost_basis, total_quantity);
    positions.push(position.clone());
    Ok(position)
}

pub(crate) fn update_position_in(
    positions: &mut [Position],
    symbol: &str,
    cost_basis: f64,
    additional_qty: f64,
) -> Option<Position> {
    let position = positions.iter_mut().find(|p| p.symbol == symbol)?;
    position.cost_basis = cost_basis;
    position.total_quantity += additional_qty;
    Some(position.clone())
}

pub(crate) fn append_pnl_in(
    positions: &mut [Position],
    symbol: &str,
    timestamp: DateTime<Utc>,
    value: f64,
) -> Option<PnlEntry> {
    let position = positions.iter_mut().find(|p| p.symbol == symbol)?;
    let entry = PnlEntry { timestamp, value };
    position.pnl_history.push(entry);
    Some(entry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
