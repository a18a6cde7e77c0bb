//! Ollama HTTP client and prompt assembly.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::config::OllamaConfig;
use crate::core::error::BackendError;
use crate::features::context::{ContextEntry, Role};

/// One generation request. Carries everything the backend needs so the
/// caller decides model and bounds per call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Seam between the engine and the generative service. Implementations do
/// not retry; retry policy belongs to the caller.
#[async_trait]
pub trait ResponseBackend: Send + Sync {
    /// Produce text for a prompt, or a typed failure. Must return within
    /// `request.timeout`.
    async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError>;

    /// Models the service currently offers.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

#[derive(Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateReply {
    response: Option<String>,
}

#[derive(Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// Stateless client for the Ollama `/api/generate` endpoint.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("palaver/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(OllamaBackend {
            client,
            base_url: config.base_url(),
        })
    }

    fn map_send_error(e: reqwest::Error, timeout: Duration) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(timeout)
        } else {
            BackendError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
impl ResponseBackend for OllamaBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError> {
        let payload = GeneratePayload {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        };

        debug!(
            "generate: model={} prompt_len={} timeout={:?}",
            request.model,
            request.prompt.len(),
            request.timeout
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, request.timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::ModelNotFound(request.model));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Malformed(format!("HTTP {status}: {body}")));
        }

        let reply: GenerateReply = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(request.timeout)
            } else {
                BackendError::Malformed(e.to_string())
            }
        })?;

        match reply.response {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(BackendError::Malformed(
                "missing `response` field".to_string(),
            )),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let timeout = Duration::from_secs(10);
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(BackendError::Malformed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let tags: TagsReply = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Assemble the full prompt: system prompt with `{bot_name}` substituted,
/// recent conversation, then the new user message.
pub fn build_prompt(
    system_prompt: &str,
    bot_name: &str,
    history: &[ContextEntry],
    user_message: &str,
) -> String {
    let mut prompt = system_prompt.replace("{bot_name}", bot_name);

    if !history.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        for entry in history {
            match entry.role {
                Role::User => {
                    prompt.push_str(&format!("{}: {}\n", entry.identity, entry.text));
                }
                Role::Bot => {
                    prompt.push_str(&format!("Assistant: {}\n", entry.text));
                }
            }
        }
    }

    prompt.push_str(&format!("\nUser: {user_message}\nAssistant:"));
    prompt
}
