//! SQLite storage via sqlx.
//!
//! Tables: `coins`, `prices`, `orders`, `portfolio`, `pnl_entries`.
//! Timestamps are stored as Unix milliseconds. The schema is created on
//! connect, so a fresh database file needs no migration step.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::{validate_order, DataStorage};
use crate::types::{BotError, Coin, Direction, OhlcSample, Order, PnlEntry, Position};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS coins (
        symbol        TEXT PRIMARY KEY,
        coin_id       TEXT NOT NULL,
        realized_pnl  REAL NOT NULL DEFAULT 0,
        price_change  REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prices (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol  TEXT NOT NULL REFERENCES coins(symbol),
        ts      INTEGER NOT NULL,
        open    REAL NOT NULL,
        high    REAL NOT NULL,
        low     REAL NOT NULL,
        close   REAL NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_prices_symbol_ts ON prices(symbol, ts)",
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        ts         INTEGER NOT NULL,
        price      REAL NOT NULL,
        quantity   REAL NOT NULL CHECK (quantity > 0),
        symbol     TEXT NOT NULL,
        direction  TEXT NOT NULL CHECK (direction IN ('BUY', 'SELL'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS portfolio (
        symbol          TEXT PRIMARY KEY,
        cost_basis      REAL NOT NULL,
        total_quantity  REAL NOT NULL CHECK (total_quantity >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pnl_entries (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol  TEXT NOT NULL REFERENCES portfolio(symbol),
        ts      INTEGER NOT NULL,
        value   REAL NOT NULL
    )
    "#,
];

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL: {url}"))?
            .create_if_missing(true);

        // In-memory databases are per-connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database {url}"))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("Failed to create SQLite schema")?;
        }

        info!(url, "SQLite storage ready");
        Ok(Self { pool })
    }

    async fn load_prices(&self, symbol: &str) -> Result<Vec<OhlcSample>> {
        let rows = sqlx::query(
            "SELECT ts, open, high, low, close FROM prices WHERE symbol = ? ORDER BY ts, id",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load prices")?;

        rows.iter()
            .map(|row| -> Result<OhlcSample> {
                Ok(OhlcSample {
                    timestamp: from_millis(row.try_get("ts")?)?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                })
            })
            .collect()
    }

    async fn load_pnl(&self, symbol: &str) -> Result<Vec<PnlEntry>> {
        let rows = sqlx::query("SELECT ts, value FROM pnl_entries WHERE symbol = ? ORDER BY id")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load PnL history")?;

        rows.iter()
            .map(|row| -> Result<PnlEntry> {
                Ok(PnlEntry {
                    timestamp: from_millis(row.try_get("ts")?)?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn coin_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Coin> {
        let symbol: String = row.try_get("symbol")?;
        let prices = self.load_prices(&symbol).await?;
        Ok(Coin {
            coin_id: row.try_get("coin_id")?,
            realized_pnl: row.try_get("realized_pnl")?,
            price_change: row.try_get("price_change")?,
            prices,
            symbol,
        })
    }

    async fn position_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
        let symbol: String = row.try_get("symbol")?;
        let pnl_history = self.load_pnl(&symbol).await?;
        Ok(Position {
            cost_basis: row.try_get("cost_basis")?,
            total_quantity: row.try_get("total_quantity")?,
            pnl_history,
            symbol,
        })
    }

    async fn coin_exists(&self, symbol: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM coins WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Insert samples not older than `last_ts`. Returns how many were kept.
    async fn insert_samples(
        &self,
        symbol: &str,
        last_ts: Option<i64>,
        samples: &[OhlcSample],
    ) -> Result<usize> {
        let mut incoming: Vec<&OhlcSample> = samples.iter().collect();
        incoming.sort_by_key(|s| s.timestamp);

        let mut tx = self.pool.begin().await?;
        let mut last = last_ts;
        let mut appended = 0;
        for sample in incoming {
            let ts = sample.timestamp.timestamp_millis();
            if last.is_some_and(|l| ts < l) {
                continue;
            }
            sqlx::query(
                "INSERT INTO prices (symbol, ts, open, high, low, close) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(symbol)
            .bind(ts)
            .bind(sample.open)
            .bind(sample.high)
            .bind(sample.low)
            .bind(sample.close)
            .execute(&mut *tx)
            .await
            .context("Failed to insert price sample")?;
            last = Some(ts);
            appended += 1;
        }
        tx.commit().await?;
        Ok(appended)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BotError::Storage(format!("Invalid timestamp: {ms}")).into())
}

#[async_trait]
impl DataStorage for SqliteStorage {
    async fn get_all_coins(&self) -> Result<Vec<Coin>> {
        let rows = sqlx::query("SELECT symbol, coin_id, realized_pnl, price_change FROM coins ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load coins")?;

        let mut coins = Vec::with_capacity(rows.len());
        for row in &rows {
            coins.push(self.coin_from_row(row).await?);
        }
        Ok(coins)
    }

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>> {
        let row = sqlx::query(
            "SELECT symbol, coin_id, realized_pnl, price_change FROM coins WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load coin")?;

        match row {
            Some(row) => Ok(Some(self.coin_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn add_coin(&self, coin: &Coin) -> Result<Option<Coin>> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO coins (symbol, coin_id, realized_pnl, price_change) VALUES (?, ?, ?, ?)",
        )
        .bind(&coin.symbol)
        .bind(&coin.coin_id)
        .bind(coin.realized_pnl)
        .bind(coin.price_change)
        .execute(&self.pool)
        .await
        .context("Failed to insert coin")?;

        if inserted.rows_affected() == 0 {
            return Ok(None);
        }
        self.insert_samples(&coin.symbol, None, &coin.prices).await?;
        self.get_coin_by_symbol(&coin.symbol).await
    }

    async fn append_prices(&self, symbol: &str, samples: &[OhlcSample]) -> Result<Option<usize>> {
        if !self.coin_exists(symbol).await? {
            return Ok(None);
        }
        let last_ts: Option<i64> = sqlx::query("SELECT MAX(ts) AS last_ts FROM prices WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?
            .try_get("last_ts")?;

        Ok(Some(self.insert_samples(symbol, last_ts, samples).await?))
    }

    async fn update_price_change(&self, symbol: &str, price_change: f64) -> Result<bool> {
        let result = sqlx::query("UPDATE coins SET price_change = ? WHERE symbol = ?")
            .bind(price_change)
            .bind(symbol)
            .execute(&self.pool)
            .await
            .context("Failed to update price change")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_realized_pnl(&self, symbol: &str, realized_pnl: f64) -> Result<bool> {
        let result = sqlx::query("UPDATE coins SET realized_pnl = ? WHERE symbol = ?")
            .bind(realized_pnl)
            .bind(symbol)
            .execute(&self.pool)
            .await
            .context("Failed to update realized PnL")?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all_orders(&self, direction: Option<Direction>) -> Result<Vec<Order>> {
        let rows = match direction {
            Some(d) => {
                sqlx::query(
                    "SELECT ts, price, quantity, symbol, direction FROM orders WHERE direction = ? ORDER BY id",
                )
                .bind(d.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT ts, price, quantity, symbol, direction FROM orders ORDER BY id")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to load orders")?;

        rows.iter()
            .map(|row| -> Result<Order> {
                let direction: String = row.try_get("direction")?;
                Ok(Order {
                    timestamp: from_millis(row.try_get("ts")?)?,
                    price: row.try_get("price")?,
                    quantity: row.try_get("quantity")?,
                    symbol: row.try_get("symbol")?,
                    direction: direction.parse()?,
                })
            })
            .collect()
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        validate_order(order)?;
        sqlx::query(
            "INSERT INTO orders (ts, price, quantity, symbol, direction) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order.timestamp.timestamp_millis())
        .bind(order.price)
        .bind(order.quantity)
        .bind(&order.symbol)
        .bind(order.direction.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to insert order")?;
        Ok(())
    }

    async fn get_all_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT symbol, cost_basis, total_quantity FROM portfolio ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load portfolio")?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in &rows {
            positions.push(self.position_from_row(row).await?);
        }
        Ok(positions)
    }

    async fn get_position_by_symbol(&self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query(
            "SELECT symbol, cost_basis, total_quantity FROM portfolio WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load position")?;

        match row {
            Some(row) => Ok(Some(self.position_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn insert_position(
        &self,
        symbol: &str,
        cost_basis: f64,
        total_quantity: f64,
    ) -> Result<Position> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO portfolio (symbol, cost_basis, total_quantity) VALUES (?, ?, ?)",
        )
        .bind(symbol)
        .bind(cost_basis)
        .bind(total_quantity)
        .execute(&self.pool)
        .await
        .context("Failed to insert position")?;

        if result.rows_affected() == 0 {
            return Err(BotError::Storage(format!("Position already exists for {symbol}")).into());
        }
        Ok(Position::new(symbol, cost_basis, total_quantity))
    }

    async fn update_position_by_symbol(
        &self,
        symbol: &str,
        cost_basis: f64,
        additional_qty: f64,
    ) -> Result<Option<Position>> {
        let result = sqlx::query(
            "UPDATE portfolio SET cost_basis = ?, total_quantity = total_quantity + ? WHERE symbol = ?",
        )
        .bind(cost_basis)
        .bind(additional_qty)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .context("Failed to update position")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_position_by_symbol(symbol).await
    }

    async fn append_pnl_entry(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<Option<PnlEntry>> {
        let result = sqlx::query(
            "INSERT INTO pnl_entries (symbol, ts, value) SELECT symbol, ?, ? FROM portfolio WHERE symbol = ?",
        )
        .bind(timestamp.timestamp_millis())
        .bind(value)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .context("Failed to append PnL entry")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(PnlEntry { timestamp, value }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
