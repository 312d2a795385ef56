//! Strategy layer: oracle-gated entries and threshold exits.
//!
//! `StrategyV1` and `StrategyV2` differ only in how they build the decision
//! context and how strong a signal they require. Order execution and the
//! stop-loss / take-profit sweep live in `StrategyCore` and are shared.

pub mod indicators;
pub mod signal;
pub mod trading;
pub mod v1;
pub mod v2;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::TradeConfig;
use crate::llm::DecisionEngine;
use crate::market_data::MarketDataPort;
use crate::storage::DataStorage;
use crate::types::{Coin, Direction, LiquidityPool, Order};
use trading::TradingService;

pub use signal::{is_affirmative, BuySignal};
pub use v1::StrategyV1;
pub use v2::StrategyV2;

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Ask the oracle and, on an affirmative answer, record a paper buy.
    /// Returns the executed order, if any.
    async fn evaluate_and_execute_buy(
        &self,
        coin: &Coin,
        price: f64,
        pools: &[LiquidityPool],
    ) -> Result<Option<Order>>;

    /// Sweep every open BUY lot for the coin against the exit thresholds.
    async fn evaluate_and_execute_sell(&self, coin: &Coin, price: f64) -> Result<Vec<ExitFill>>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Exit types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitTrigger::StopLoss => write!(f, "STOP_LOSS"),
            ExitTrigger::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// A SELL produced by the exit sweep.
#[derive(Debug, Clone)]
pub struct ExitFill {
    pub order: Order,
    pub trigger: ExitTrigger,
    /// Percent move from the lot's entry price.
    pub pnl_pct: f64,
}

// ---------------------------------------------------------------------------
// Shared core
// ---------------------------------------------------------------------------

pub struct StrategyCore {
    storage: Arc<dyn DataStorage>,
    decision_engine: Arc<dyn DecisionEngine>,
    market_data: Arc<dyn MarketDataPort>,
    trade: TradeConfig,
    instructions: String,
}

impl StrategyCore {
    pub fn new(
        storage: Arc<dyn DataStorage>,
        decision_engine: Arc<dyn DecisionEngine>,
        market_data: Arc<dyn MarketDataPort>,
        trade: TradeConfig,
        instructions: String,
    ) -> Self {
        Self {
            storage,
            decision_engine,
            market_data,
            trade,
            instructions,
        }
    }

    pub fn market_data(&self) -> &Arc<dyn MarketDataPort> {
        &self.market_data
    }

    /// Decision context sent to the oracle. `rsi` is omitted when `None`.
    pub fn context(coin: &Coin, pools: &[LiquidityPool], rsi: Option<f64>) -> Value {
        let mut context = json!({
            "coin": coin.snapshot(),
            "pools": pools,
            "price_change": coin.price_change,
        });
        if let (Some(rsi), Some(map)) = (rsi, context.as_object_mut()) {
            map.insert("rsi".to_string(), json!(rsi));
        }
        context
    }

    /// Query the oracle, classify its answer, and buy on `required`.
    pub async fn decide_and_buy(
        &self,
        strategy: &str,
        coin: &Coin,
        price: f64,
        context: Value,
        required: BuySignal,
    ) -> Result<Option<Order>> {
        let recommendation = self
            .decision_engine
            .get_recommendation(&context, &self.instructions)
            .await;

        let affirmative = is_affirmative(&recommendation, required);
        info!(
            strategy,
            symbol = %coin.symbol,
            decision = if affirmative { "BUY" } else { "NEUTRAL/SELL" },
            reason = %recommendation,
            price,
            "Oracle recommendation"
        );

        if !affirmative {
            return Ok(None);
        }
        self.execute_buy(&coin.symbol, price).await.map(Some)
    }

    /// Record a paper BUY of the configured quantity and fold it into the
    /// symbol's position.
    pub async fn execute_buy(&self, symbol: &str, price: f64) -> Result<Order> {
        let order = TradingService::buy(symbol, price, self.trade.order_quantity);

        match self.storage.get_position_by_symbol(symbol).await? {
            None => {
                self.storage
                    .insert_position(symbol, order.price, order.quantity)
                    .await?;
                debug!(symbol, "Opened new position");
            }
            Some(position) => {
                let cost_basis = TradingService::cost_basis(
                    position.cost_basis,
                    position.total_quantity,
                    order.quantity,
                    order.price,
                );
                self.storage
                    .update_position_by_symbol(symbol, cost_basis, order.quantity)
                    .await?;
                debug!(symbol, cost_basis, "Updated existing position");
            }
        }

        self.storage.insert_order(&order).await?;
        info!(
            symbol,
            decision = "EXECUTE_BUY",
            price = order.price,
            quantity = order.quantity,
            "Executed BUY"
        );
        Ok(order)
    }

    /// Which exit, if any, fires for a lot entered at `entry`.
    /// Both bounds are inclusive; stop-loss wins when both hold.
    pub fn exit_trigger(&self, entry: f64, price: f64) -> Option<ExitTrigger> {
        let stop = entry * (1.0 - self.trade.stop_loss_pct / 100.0);
        let take = entry * (1.0 + self.trade.take_profit_pct / 100.0);
        if price <= stop {
            Some(ExitTrigger::StopLoss)
        } else if price >= take {
            Some(ExitTrigger::TakeProfit)
        } else {
            None
        }
    }

    /// Evaluate every BUY lot for the coin. Lots stay open after a SELL, so
    /// a lot beyond its bounds sells again on later sweeps.
    pub async fn execute_exits(&self, coin: &Coin, price: f64) -> Result<Vec<ExitFill>> {
        let lots: Vec<Order> = self
            .storage
            .get_all_orders(Some(Direction::Buy))
            .await?
            .into_iter()
            .filter(|o| o.symbol == coin.symbol)
            .collect();

        let mut fills = Vec::new();
        for lot in lots {
            let Some(trigger) = self.exit_trigger(lot.price, price) else {
                continue;
            };
            let pnl_pct = (price - lot.price) / lot.price * 100.0;

            info!(
                symbol = %lot.symbol,
                decision = "EXECUTE_SELL",
                reason = %trigger,
                price,
                quantity = lot.quantity,
                pnl_percentage = pnl_pct,
                "{trigger} triggered"
            );

            let order = TradingService::sell(&lot.symbol, price, lot.quantity);
            self.storage.insert_order(&order).await?;
            self.storage.update_realized_pnl(&lot.symbol, pnl_pct).await?;

            fills.push(ExitFill {
                order,
                trigger,
                pnl_pct,
            });
        }
        Ok(fills)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
