//! COINPILOT: autonomous AI-assisted paper-trading engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires storage, market data and the decision oracle into the configured
//! plugins, and runs the trading loop with graceful shutdown.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use coinpilot::config::AppConfig;
use coinpilot::engine::refresh::CoinRefresher;
use coinpilot::engine::shadow::build_shadow;
use coinpilot::engine::EngineParts;
use coinpilot::llm::{build_decision_engine, load_instructions};
use coinpilot::market_data::{build_gateway, MarketDataPort};
use coinpilot::plugins::{PluginContext, Plugins};
use coinpilot::storage::build_storage;

const BANNER: &str = r#"
  ____      _       ____  _ _       _
 / ___|___ (_)_ __ |  _ \(_) | ___ | |_
| |   / _ \| | '_ \| |_) | | |/ _ \| __|
| |__| (_) | | | | |  __/| | | (_) | |_
 \____\___/|_|_| |_|_|   |_|_|\___/ \__|

  Paper-trading engine v0.1.0
"#;

#[derive(Parser, Debug)]
#[command(name = "coinpilot", version, about = "Autonomous AI-assisted paper-trading engine")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Seconds to sleep between trading cycles (default: engine.cycle_interval_secs, 3600).
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single trading cycle and exit.
    #[arg(long)]
    once: bool,

    /// Do not refresh coin prices before or during the run.
    #[arg(long)]
    skip_refresh: bool,

    /// Seed an empty coin store from the market-data provider and exit.
    #[arg(long)]
    init_db: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();
    let args = Args::parse();

    init_logging();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "A critical, unhandled error occurred");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(&args.config)?;
    if let Some(interval) = args.interval {
        config.engine.cycle_interval_secs = interval;
    }
    let config = Arc::new(config);

    println!("{BANNER}");
    info!(
        config = %args.config,
        market_data = %config.providers.market_data,
        storage = %config.providers.storage,
        interval_secs = config.engine.cycle_interval_secs,
        "COINPILOT starting up"
    );

    // -- Infrastructure --------------------------------------------------

    let storage = build_storage(&config).await?;
    let market_data: Arc<dyn MarketDataPort> = Arc::new(build_gateway(&config)?);
    let refresher = Arc::new(CoinRefresher::new(storage.clone(), market_data.clone()));

    if args.init_db {
        let added = refresher.initialize().await?;
        info!(added, "Coin store initialisation finished");
        return Ok(());
    }

    if !args.skip_refresh {
        if let Err(e) = refresher.refresh().await {
            warn!(error = %e, "Initial coin refresh failed; continuing with stored data");
        }
    }

    let decision_engine = build_decision_engine(&config)?;
    let instructions = load_instructions(config.llm.prompt_template_file.as_deref());

    // -- Plugins ---------------------------------------------------------

    let ctx = PluginContext {
        config: config.clone(),
        storage: storage.clone(),
        market_data: market_data.clone(),
        decision_engine,
        instructions,
    };
    let plugins = Plugins::builtin();

    let evaluator = plugins.evaluator(&config.plugins.evaluator, &ctx)?;
    let strategy = plugins.strategy(&config.plugins.strategy, &ctx)?;
    let shadow = build_shadow(&plugins, &ctx);

    let engine = plugins.engine(
        &config.plugins.engine,
        EngineParts {
            config: config.clone(),
            storage,
            market_data,
            evaluator,
            strategy,
            shadow,
        },
    )?;

    // -- Main loop -------------------------------------------------------

    if args.once {
        engine.run(true).await?;
        info!("Single cycle finished.");
        return Ok(());
    }

    let refresh_task = (!args.skip_refresh).then(|| {
        refresher
            .clone()
            .spawn_periodic(Duration::from_secs(config.engine.refresh_interval_secs))
    });

    info!("Entering main loop. Press Ctrl+C to stop.");
    tokio::select! {
        result = engine.run(false) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
            engine.shutdown().await;
        }
    }

    if let Some(task) = refresh_task {
        task.abort();
    }
    info!(state = ?engine.state(), "COINPILOT shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coinpilot=info"));

    let json_logging = std::env::var("COINPILOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
