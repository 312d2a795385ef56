//! OpenAI chat-completions client.
//!
//! Sends the prompt template as the system message and the JSON decision
//! context as the user message. Works with any OpenAI-compatible endpoint
//! (OpenAI, OpenRouter, local gateways) via `llm.api_url`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DecisionEngine, NEUTRAL};
use crate::market_data::retry::status_error;
use crate::market_data::RetryPolicy;

const PROVIDER_NAME: &str = "openai";

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiClient {
    http: Client,
    api_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(
        api_url: &str,
        api_key: SecretString,
        model: &str,
        max_tokens: u32,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key,
            model: model.to_string(),
            max_tokens,
            retry,
        })
    }

    fn build_request(&self, context: &Value, instructions: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(instructions.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(context.to_string()),
                },
            ],
        }
    }

    fn extract_text(body: ChatResponse) -> Option<String> {
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|text| !text.trim().is_empty())
    }

    /// One completion attempt. Failures come back classified so the retry
    /// policy can tell 429 / 5xx / network errors from permanent ones.
    async fn send_once(&self, request: &ChatRequest) -> Result<Option<String>> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .with_context(|| format!("OpenAI request failed (model={})", self.model))?;

        if !response.status().is_success() {
            return Err(status_error(PROVIDER_NAME, response).await.into());
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        Ok(Self::extract_text(body))
    }

    async fn call_api(&self, context: &Value, instructions: &str) -> Result<Option<String>> {
        let request = self.build_request(context, instructions);
        let request = &request;
        self.retry
            .run("openai.chat", || self.send_once(request))
            .await
    }
}

// ---------------------------------------------------------------------------
// DecisionEngine implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl DecisionEngine for OpenAiClient {
    async fn get_recommendation(&self, context: &Value, instructions: &str) -> String {
        debug!(context = %context, "Requesting recommendation");
        match self.call_api(context, instructions).await {
            Ok(Some(text)) => {
                debug!(recommendation = %text, "Received recommendation");
                text
            }
            Ok(None) => {
                warn!("Empty recommendation, treating as NEUTRAL");
                NEUTRAL.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Recommendation failed, treating as NEUTRAL");
                NEUTRAL.to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
