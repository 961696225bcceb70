use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IntakeError, IntakeResult};

const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Bounded so the stage machine is never blocked indefinitely
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration for the chat-completions gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// API key (from INTAKE_LLM_API_KEY); without one every call is unreachable
    pub api_key: Option<String>,
    /// Chat-completions endpoint
    pub api_url: String,
    /// Model to use
    pub model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 700,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key = std::env::var("INTAKE_LLM_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Ok(url) = std::env::var("INTAKE_LLM_API_URL") {
            config.api_url = url;
        }
        if let Ok(model) = std::env::var("INTAKE_LLM_MODEL") {
            config.model = model;
        }
        if let Some(secs) = std::env::var("INTAKE_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// A role/content pair as sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Boundary to an external language model.
///
/// Implementations return the raw assistant text; schema enforcement happens
/// in [`crate::llm::validation`].
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, system: &str, history: &[PromptMessage]) -> IntakeResult<String>;
}

/// Gateway speaking the OpenAI-compatible chat-completions protocol
pub struct ChatCompletionsClient {
    client: Client,
    config: GatewayConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: GatewayConfig) -> IntakeResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IntakeError::UpstreamUnreachable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[async_trait]
impl LlmGateway for ChatCompletionsClient {
    async fn complete(&self, system: &str, history: &[PromptMessage]) -> IntakeResult<String> {
        let Some(api_key) = &self.config.api_key else {
            return Err(IntakeError::UpstreamUnreachable(
                "No API key configured".to_string(),
            ));
        };

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(PromptMessage::new("system", system));
        messages.extend(history.iter().cloned());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        };

        debug!(
            "Sending {} messages to {}",
            request.messages.len(),
            self.config.api_url
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timeout" } else { "network" };
                warn!("LLM {} error: {}", kind, e);
                IntakeError::UpstreamUnreachable(format!("{kind}: {e}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IntakeError::UpstreamUnreachable(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            warn!("LLM API error: {}", status);
            return Err(IntakeError::UpstreamUnreachable(format!(
                "LLM API error: {status} - {body}"
            )));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| IntakeError::schema(format!("Unexpected completion envelope: {e}"), body.clone()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| IntakeError::schema("No text content in response", body))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<PromptMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}
