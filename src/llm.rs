//! Chat-completion client for the advisor.
//!
//! Speaks the OpenAI `/chat/completions` wire format, which most hosted
//! and self-hosted model servers accept.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::AppError;
use crate::models::consultation::ChatTurn;

/// Given an ordered transcript, produce the next assistant reply.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, AppError>;
}

pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl OpenAiChatClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        if cfg.llm_api_key.is_empty() {
            tracing::warn!("no LLM API key configured, advisor replies will fail");
        }
        Self::new(
            &cfg.llm_base_url,
            &cfg.llm_api_key,
            &cfg.llm_model,
            Duration::from_secs(cfg.llm_timeout_secs),
        )
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages: turns,
            })
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "chat completion returned {}: {}",
                status, body
            )));
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid completion body: {}", e)))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::Upstream("completion contained no reply".into()))?;

        tracing::debug!(model = %self.model, turns = turns.len(), "advisor reply received");
        Ok(reply)
    }
}
