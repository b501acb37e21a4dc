//! OpenAI-compatible chat backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use transcribe_core::{ChatModel, ChatRequest, ChatResponse};

use crate::LlmError;

/// HTTP backend configuration
#[derive(Debug, Clone)]
pub struct HttpChatModelConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Retries for transient failures (5xx, timeout)
    pub max_retries: u32,
    /// Initial backoff, doubled per retry
    pub initial_backoff: Duration,
}

impl Default for HttpChatModelConfig {
    fn default() -> Self {
        Self {
            api_base: transcribe_config::constants::endpoints::LLM_DEFAULT.clone(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl From<&transcribe_config::LlmConfig> for HttpChatModelConfig {
    fn from(cfg: &transcribe_config::LlmConfig) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            ..Default::default()
        }
    }
}

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint
pub struct HttpChatModel {
    client: Client,
    config: HttpChatModelConfig,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

impl HttpChatModel {
    pub fn new(config: HttpChatModelConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn call_once(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = WireRequest {
            model: &self.config.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .timeout(request.deadline)
            .json(&body);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(request.deadline)
            } else {
                LlmError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = wire
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("empty completion".to_string()))?;

        Ok(ChatResponse {
            content,
            model: wire.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    fn is_transient(err: &LlmError) -> bool {
        match err {
            LlmError::Timeout(_) | LlmError::Request(_) => true,
            LlmError::Status { status, .. } => *status >= 500 || *status == 429,
            LlmError::Parse(_) => false,
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;
        loop {
            match self.call_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_transient(&e) && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Chat call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
