//! End-to-end scenarios.
//!
//! Wires storage, a failover gateway over mock providers, the scripted
//! oracle and the built-in plugins the same way `main` does, then drives
//! whole trading cycles.

use std::path::PathBuf;
use std::sync::Arc;

use coinpilot::config::AppConfig;
use coinpilot::engine::refresh::CoinRefresher;
use coinpilot::engine::shadow::build_shadow;
use coinpilot::engine::{Engine, EngineParts, EngineState, TradingEngine};
use coinpilot::market_data::{MarketDataGateway, MarketDataPort, RetryPolicy};
use coinpilot::plugins::{PluginContext, Plugins};
use coinpilot::storage::{build_storage, DataStorage, JsonStorage};
use coinpilot::types::{BotError, Direction};
use uuid::Uuid;

use crate::mock_market::{coin, MockMarket, ScriptedOracle};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Scratch directory removed on drop.
struct TempDir(PathBuf);

impl TempDir {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("coinpilot-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    fn file(&self, name: &str) -> String {
        self.0.join(name).to_string_lossy().into_owned()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn config(dir: &TempDir, extra: &str) -> AppConfig {
    let toml = format!(
        r#"
        [trade]
        take_profit_pct = 20.0
        stop_loss_pct = 10.0
        order_quantity = 1.0
        price_change_threshold = 3.0

        [pool]
        min_volume_24h = 1000.0
        min_reserves_usd = 10000.0
        min_buys_24h = 10.0

        [api]
        max_retries = 3
        retry_backoff_multiplier = 0.0
        min_delay_secs = 0.0
        max_delay_secs = 0.0
        request_timeout_secs = 5

        [storage]
        coins_file = '{coins}'
        orders_file = '{orders}'
        portfolio_file = '{portfolio}'
        sqlite_url = "sqlite::memory:"

        {extra}
        "#,
        coins = dir.file("coins.json"),
        orders = dir.file("orders.json"),
        portfolio = dir.file("portfolio.json"),
    );
    let config = AppConfig::from_toml_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

struct Harness {
    storage: Arc<dyn DataStorage>,
    primary: Arc<MockMarket>,
    backup: Arc<MockMarket>,
    oracle: Arc<ScriptedOracle>,
    engine: Engine,
}

async fn harness(
    config: AppConfig,
    primary: MockMarket,
    backup: MockMarket,
    oracle: ScriptedOracle,
) -> Harness {
    let config = Arc::new(config);
    let storage = build_storage(&config).await.unwrap();
    let primary = Arc::new(primary);
    let backup = Arc::new(backup);
    let oracle = Arc::new(oracle);

    let providers: Vec<Arc<dyn MarketDataPort>> = vec![primary.clone(), backup.clone()];
    let market_data: Arc<dyn MarketDataPort> = Arc::new(MarketDataGateway::new(
        providers,
        RetryPolicy::from_config(&config.api),
    ));

    CoinRefresher::new(storage.clone(), market_data.clone())
        .initialize()
        .await
        .unwrap();

    let ctx = PluginContext {
        config: config.clone(),
        storage: storage.clone(),
        market_data: market_data.clone(),
        decision_engine: oracle.clone(),
        instructions: "Should I buy?".to_string(),
    };
    let plugins = Plugins::builtin();
    let evaluator = plugins.evaluator(&config.plugins.evaluator, &ctx).unwrap();
    let strategy = plugins.strategy(&config.plugins.strategy, &ctx).unwrap();
    let shadow = build_shadow(&plugins, &ctx);

    let engine = Engine::new(EngineParts {
        config,
        storage: storage.clone(),
        market_data,
        evaluator,
        strategy,
        shadow,
    });

    Harness {
        storage,
        primary,
        backup,
        oracle,
        engine,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_btc_round_trip_through_failover_and_json_files() {
    let dir = TempDir::new();
    let h = harness(
        config(&dir, ""),
        MockMarket::failing("primary", "503 Service Unavailable"),
        MockMarket::new("backup", Some(100.0)).with_coins(vec![coin("bitcoin", "BTC", 5.0)]),
        ScriptedOracle::new(&["BUY"], "HOLD"),
    )
    .await;

    let first = tokio_test::assert_ok!(h.engine.run_cycle().await);
    assert_eq!(first.buys, 1);

    let position = h.storage.get_position_by_symbol("BTC").await.unwrap().unwrap();
    assert_eq!(position.cost_basis, 100.0);
    assert_eq!(position.total_quantity, 1.0);

    let contexts = h.oracle.contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0]["rsi"].as_f64().is_some());
    assert_eq!(contexts[0]["pools"].as_array().unwrap().len(), 1);

    h.backup.set_price(Some(130.0));
    let second = tokio_test::assert_ok!(h.engine.run_cycle().await);
    assert_eq!(second.sells, 1);

    let btc = h.storage.get_coin_by_symbol("BTC").await.unwrap().unwrap();
    assert!((btc.realized_pnl - 30.0).abs() < 1e-9);

    // The primary was retried on every call and never answered.
    assert!(h.primary.calls() >= 3);

    // Everything was written through to disk.
    let reopened = JsonStorage::new(
        &dir.file("coins.json"),
        &dir.file("orders.json"),
        &dir.file("portfolio.json"),
    );
    let orders = reopened.get_all_orders(None).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].direction, Direction::Buy);
    assert_eq!(orders[1].direction, Direction::Sell);
    assert_eq!(orders[1].price, 130.0);
    let position = reopened.get_position_by_symbol("BTC").await.unwrap().unwrap();
    assert_eq!(position.pnl_history.len(), 2);
}

#[tokio::test]
async fn test_gateway_prefers_first_healthy_provider() {
    let a = Arc::new(MockMarket::failing("a", "connection reset"));
    let b = Arc::new(MockMarket::new("b", Some(42.0)));
    let providers: Vec<Arc<dyn MarketDataPort>> = vec![a.clone(), b.clone()];
    let gateway = MarketDataGateway::new(
        providers,
        RetryPolicy::from_config(&config(&TempDir::new(), "").api),
    );

    assert_eq!(gateway.get_price("bitcoin").await.unwrap(), Some(42.0));
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 1);

    a.clear_error();
    a.set_price(Some(41.0));
    assert_eq!(gateway.get_price("bitcoin").await.unwrap(), Some(41.0));
    assert_eq!(b.calls(), 1);

    a.set_error("timeout");
    b.set_error("timeout");
    let price = tokio_test::assert_ok!(gateway.get_price("bitcoin").await);
    assert_eq!(price, None);
    assert!(gateway.search_pools("BTC", None).await.unwrap().is_null());
}

#[tokio::test]
async fn test_plugin_versions_resolve_from_config() {
    let dir = TempDir::new();
    let config = config(
        &dir,
        r#"
        [plugins.engine]
        module = "engine"
        class = "Engine"

        [plugins.evaluator]
        module = "evaluator"
        class = "Evaluator"
        version = "v1"

        [plugins.strategy]
        module = "strategy"
        class = "Strategy"
        version = "v7"
        "#,
    );
    let ctx = PluginContext {
        config: Arc::new(config.clone()),
        storage: Arc::new(coinpilot::storage::MemoryStorage::new()),
        market_data: Arc::new(MockMarket::new("m", Some(1.0))),
        decision_engine: Arc::new(ScriptedOracle::always("HOLD")),
        instructions: String::new(),
    };
    let plugins = Plugins::builtin();

    let fallback = plugins.strategy(&config.plugins.strategy, &ctx).unwrap();
    assert_eq!(fallback.name(), "StrategyV1");

    let mut v2 = config.plugins.strategy.clone();
    v2.version = Some("2".into());
    assert_eq!(plugins.strategy(&v2, &ctx).unwrap().name(), "StrategyV2");

    let mut missing = config.plugins.strategy.clone();
    missing.class = "Momentum".into();
    let err = match plugins.strategy(&missing, &ctx) {
        Err(e) => e,
        Ok(s) => panic!("unexpectedly resolved {}", s.name()),
    };
    assert!(matches!(err, BotError::PluginNotFound { kind: "strategy", .. }));
}

#[tokio::test]
async fn test_isolated_shadow_never_touches_live_ledger() {
    let dir = TempDir::new();
    let h = harness(
        config(
            &dir,
            r#"
            [shadow]
            enabled = true
            storage = "isolated"

            [shadow.strategy]
            version = "v2"
            "#,
        ),
        MockMarket::new("primary", Some(100.0)).with_coins(vec![coin("bitcoin", "BTC", 5.0)]),
        MockMarket::new("backup", None),
        ScriptedOracle::always("STRONG BUY"),
    )
    .await;

    tokio_test::assert_ok!(h.engine.run(true).await);
    assert_eq!(h.engine.state(), EngineState::Stopped);

    let stats = h.engine.shadow().expect("shadow enabled").stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.completed, 1);

    // Production bought once; the shadow buy went to its private ledger.
    let live = h.storage.get_all_orders(None).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(h.oracle.contexts().len(), 2);
    assert_eq!(h.backup.calls(), 0);
}

#[tokio::test]
async fn test_shared_shadow_writes_to_live_ledger() {
    let dir = TempDir::new();
    let h = harness(
        config(
            &dir,
            r#"
            [shadow]
            enabled = true

            [shadow.strategy]
            version = "v2"
            "#,
        ),
        MockMarket::new("primary", Some(100.0)).with_coins(vec![coin("bitcoin", "BTC", 5.0)]),
        MockMarket::new("backup", None),
        ScriptedOracle::always("STRONG BUY"),
    )
    .await;

    tokio_test::assert_ok!(h.engine.run(true).await);

    let buys = h.storage.get_all_orders(Some(Direction::Buy)).await.unwrap();
    assert_eq!(buys.len(), 2);
    let position = h.storage.get_position_by_symbol("BTC").await.unwrap().unwrap();
    assert_eq!(position.total_quantity, 2.0);
}

#[tokio::test]
async fn test_sqlite_backend_runs_a_cycle() {
    let dir = TempDir::new();
    let h = harness(
        config(&dir, "[providers]\nmarket_data = \"coingecko\"\nstorage = \"sqlite\"\n"),
        MockMarket::new("primary", Some(100.0)).with_coins(vec![coin("bitcoin", "BTC", 5.0)]),
        MockMarket::new("backup", None),
        ScriptedOracle::always("buy"),
    )
    .await;

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.buys, 1);
    let position = h.storage.get_position_by_symbol("BTC").await.unwrap().unwrap();
    assert_eq!(position.cost_basis, 100.0);
    assert_eq!(position.pnl_history.len(), 1);
}

#[tokio::test]
async fn test_no_price_and_no_pools_mean_no_trades() {
    let dir = TempDir::new();
    let h = harness(
        config(&dir, ""),
        MockMarket::new("primary", None)
            .without_pools()
            .with_coins(vec![coin("bitcoin", "BTC", 5.0), coin("ethereum", "ETH", 0.5)]),
        MockMarket::new("backup", None).without_pools(),
        ScriptedOracle::always("BUY"),
    )
    .await;

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.coins_seen, 2);
    assert_eq!(report.candidates, 1);
    assert_eq!(report.priced, 0);
    assert!(h.oracle.contexts().is_empty());
    assert!(h.storage.get_all_orders(None).await.unwrap().is_empty());

    h.primary.set_price(Some(50.0));
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.priced, 1);
    assert_eq!(report.buys, 0);
    assert!(h.oracle.contexts().is_empty());
}
