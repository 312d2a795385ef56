//! Conservative strategy: no indicators, buys only on "STRONG BUY".

use anyhow::Result;
use async_trait::async_trait;

use super::{BuySignal, ExitFill, Strategy, StrategyCore};
use crate::types::{Coin, LiquidityPool, Order};

pub struct StrategyV2 {
    core: StrategyCore,
}

impl StrategyV2 {
    pub fn new(core: StrategyCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Strategy for StrategyV2 {
    async fn evaluate_and_execute_buy(
        &self,
        coin: &Coin,
        price: f64,
        pools: &[LiquidityPool],
    ) -> Result<Option<Order>> {
        let context = StrategyCore::context(coin, pools, None);
        self.core
            .decide_and_buy(self.name(), coin, price, context, BuySignal::StrongBuy)
            .await
    }

    async fn evaluate_and_execute_sell(&self, coin: &Coin, price: f64) -> Result<Vec<ExitFill>> {
        self.core.execute_exits(coin, price).await
    }

    fn name(&self) -> &str {
        "StrategyV2"
    }
}
