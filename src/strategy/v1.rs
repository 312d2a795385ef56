//! RSI-informed strategy: buys on any "BUY" from the oracle.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::indicators::{rsi, RSI_PERIOD};
use super::{BuySignal, ExitFill, Strategy, StrategyCore};
use crate::types::{Coin, LiquidityPool, Order};

/// Daily closes the RSI is computed over.
const HISTORY_DAYS: u32 = 100;

pub struct StrategyV1 {
    core: StrategyCore,
}

impl StrategyV1 {
    pub fn new(core: StrategyCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Strategy for StrategyV1 {
    async fn evaluate_and_execute_buy(
        &self,
        coin: &Coin,
        price: f64,
        pools: &[LiquidityPool],
    ) -> Result<Option<Order>> {
        let history = self
            .core
            .market_data()
            .get_historic_ohlc(&coin.coin_id, "usd", HISTORY_DAYS, "daily")
            .await?;
        let tail = history.len().saturating_sub(HISTORY_DAYS as usize);
        let closes: Vec<f64> = history[tail..].iter().map(|s| s.close).collect();

        let Some(current_rsi) = rsi(&closes, RSI_PERIOD) else {
            warn!(
                symbol = %coin.symbol,
                samples = closes.len(),
                "Not enough history to calculate RSI; skipping buy"
            );
            return Ok(None);
        };

        let context = StrategyCore::context(coin, pools, Some(current_rsi));
        self.core
            .decide_and_buy(self.name(), coin, price, context, BuySignal::Buy)
            .await
    }

    async fn evaluate_and_execute_sell(&self, coin: &Coin, price: f64) -> Result<Vec<ExitFill>> {
        self.core.execute_exits(coin, price).await
    }

    fn name(&self) -> &str {
        "StrategyV1"
    }
}
