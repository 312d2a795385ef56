//! LLM integration for buy/hold recommendations.
//!
//! Defines the `DecisionEngine` trait and the OpenAI chat-completions
//! implementation. Recommendations are free text; strategies classify them
//! with `strategy::signal`.

pub mod openai;

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::market_data::RetryPolicy;

/// Returned whenever the oracle cannot give a usable answer.
pub const NEUTRAL: &str = "NEUTRAL";

/// Instructions used when no prompt template file is configured.
pub const DEFAULT_PROMPT: &str = "Given the following crypto data, should I BUY, SELL, or HOLD? \
Provide a brief justification for your decision. ";

/// Abstraction over recommendation oracles.
///
/// Implementors never fail: transport or API errors degrade to `NEUTRAL`.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn get_recommendation(&self, context: &Value, instructions: &str) -> String;
}

/// Oracle used when no API key is configured. Always answers `NEUTRAL`,
/// so strategies never buy.
pub struct NeutralOracle;

#[async_trait]
impl DecisionEngine for NeutralOracle {
    async fn get_recommendation(&self, _context: &Value, _instructions: &str) -> String {
        NEUTRAL.to_string()
    }
}

/// Build the configured decision engine.
pub fn build_decision_engine(config: &AppConfig) -> anyhow::Result<Arc<dyn DecisionEngine>> {
    let Some(api_key) = AppConfig::resolve_secret(Some(&config.llm.api_key_env)) else {
        warn!(
            env = %config.llm.api_key_env,
            "No LLM API key configured, running in dry-run mode (all recommendations NEUTRAL)"
        );
        return Ok(Arc::new(NeutralOracle));
    };

    match config.llm.provider.as_str() {
        "openai" => {}
        other => warn!(provider = other, "Unknown LLM provider, defaulting to OpenAI"),
    }
    info!(model = %config.llm.model, "Using OpenAI-compatible decision engine");

    Ok(Arc::new(openai::OpenAiClient::new(
        &config.llm.api_url,
        api_key,
        &config.llm.model,
        config.llm.max_tokens,
        RetryPolicy::from_config(&config.api),
        // at least 60s for completions
        Duration::from_secs(config.api.request_timeout_secs.max(60)),
    )?))
}

/// Load the instruction template; a missing or unreadable file falls back
/// to [`DEFAULT_PROMPT`].
pub fn load_instructions(path: Option<&str>) -> String {
    let Some(path) = path else {
        return DEFAULT_PROMPT.to_string();
    };
    if !Path::new(path).exists() {
        warn!(path, "Prompt template not found, using default prompt");
        return DEFAULT_PROMPT.to_string();
    }
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            info!(path, "Loaded prompt template");
            text
        }
        Ok(_) => {
            warn!(path, "Prompt template is empty, using default prompt");
            DEFAULT_PROMPT.to_string()
        }
        Err(e) => {
            warn!(path, error = %e, "Failed to read prompt template, using default prompt");
            DEFAULT_PROMPT.to_string()
        }
    }
}
