//! Ollama chat client and the gateway's AI responder.
//!
//! Thin reqwest wrapper over the Ollama REST API (`/api/chat`, `/api/tags`,
//! `/api/pull`). The responder is deliberately forgiving: any failure along
//! the way yields `None` and the endpoint answers with a null `ai_response`
//! rather than an error status.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Ollama connection configuration.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL (default: `http://localhost:11434`). Env: `OLLAMA_HOST`.
    pub host: String,
    /// Model id (default: `gemma2:2b`). Env: `OLLAMA_MODEL`.
    pub model: String,
    /// Pull the model when it is missing. Env: `OLLAMA_DOWNLOAD_MODEL`.
    pub download_model: bool,
    /// System prompt prepended to every conversation.
    /// Env: `OLLAMA_SYSTEM_PROMPT`.
    pub system_prompt: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "gemma2:2b".to_string(),
            download_model: true,
            system_prompt: "You are a helpful assistant.".to_string(),
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            config.host = host.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            config.model = model;
        }
        if let Ok(download) = std::env::var("OLLAMA_DOWNLOAD_MODEL") {
            config.download_model = crate::config::parse_bool(&download);
        }
        if let Ok(prompt) = std::env::var("OLLAMA_SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }
        config
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// One turn of conversation history as accepted by `/api/ai-response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

const ALLOWED_ROLES: [&str; 3] = ["user", "assistant", "system"];

/// Ollama REST client.
pub struct OllamaClient {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build reqwest client");
        Self { config, client }
    }

    /// Chat completion with history sanitization: unknown roles demote to
    /// `user`, empty messages are dropped, the system prompt goes first.
    pub async fn chat(
        &self,
        prompt: &str,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> anyhow::Result<String> {
        let mut messages: Vec<Value> = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        for message in history {
            if message.content.is_empty() {
                continue;
            }
            let role = if ALLOWED_ROLES.contains(&message.role.as_str()) {
                message.role.as_str()
            } else {
                "user"
            };
            messages.push(json!({ "role": role, "content": message.content }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.host))
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "stream": false,
            }))
            .send()
            .await
            .context("ollama chat request failed")?
            .error_for_status()
            .context("ollama chat returned an error status")?;

        let body: Value = response
            .json()
            .await
            .context("ollama chat reply was not JSON")?;
        body["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("ollama chat reply had no message content"))
    }

    /// Make sure the configured model exists on the server, pulling it when
    /// downloads are enabled.
    pub async fn ensure_model(&self) -> anyhow::Result<()> {
        let tags: Value = self
            .client
            .get(format!("{}/api/tags", self.config.host))
            .send()
            .await
            .context("ollama tag listing failed")?
            .error_for_status()?
            .json()
            .await?;

        let present = tags["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .any(|m| m["model"].as_str() == Some(self.config.model.as_str()))
            })
            .unwrap_or(false);

        if present {
            return Ok(());
        }
        if !self.config.download_model {
            warn!(model = %self.config.model, "model missing and downloads are disabled");
            return Ok(());
        }

        debug!(model = %self.config.model, "pulling model");
        self.client
            .post(format!("{}/api/pull", self.config.host))
            .json(&json!({ "model": self.config.model, "stream": false }))
            .send()
            .await
            .context("ollama pull request failed")?
            .error_for_status()
            .context("ollama pull returned an error status")?;
        Ok(())
    }
}

/// The `/api/ai-response` collaborator: an [`OllamaClient`] plus the
/// configured system prompt.
pub struct AiResponder {
    client: OllamaClient,
    system_prompt: String,
}

impl AiResponder {
    pub fn new(config: OllamaConfig) -> Self {
        let system_prompt = config.system_prompt.clone();
        Self {
            client: OllamaClient::new(config),
            system_prompt,
        }
    }

    /// Best-effort response: any failure yields `None`.
    ///
    /// The caller may override the configured system prompt per request.
    pub async fn run(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[ChatMessage],
    ) -> Option<String> {
        let system_prompt = system_prompt.unwrap_or(&self.system_prompt);
        let result = async {
            self.client.ensure_model().await?;
            self.client.chat(prompt, system_prompt, history).await
        }
        .await;

        match result {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ai response failed");
                None
            }
        }
    }
}
