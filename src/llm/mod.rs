// src/llm/mod.rs

pub mod cache;
pub mod json;
#[cfg(test)]
pub mod testing;

use crate::config::{LlmBackend, LlmSection};
use crate::error::{ConfigError, ServiceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a completion is for. Part of the cache key and handy for fakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    InvoiceExtraction,
    Keywords,
    UnitJudgment,
    Estimation,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::InvoiceExtraction => "invoice_extraction",
            Purpose::Keywords => "keywords",
            Purpose::UnitJudgment => "unit_judgment",
            Purpose::Estimation => "estimation",
        }
    }
}

/// One request to a text-completion service.
#[derive(Debug, Clone)]
pub struct Prompt<'a> {
    pub purpose: Purpose,
    pub system: &'a str,
    pub user: String,
}

/// A blocking-style request/response text service: prompt in, raw text out.
///
/// Implementations:
/// - `ChatClient`: OpenAI-compatible `/chat/completions` (Ollama or remote)
/// - `CachedClient`: memoizing wrapper around any other client
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt<'_>) -> Result<String, ServiceError>;

    /// Provider name for logging
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug)]
struct ResolvedEndpoint {
    backend: LlmBackend,
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, ConfigError> {
    let (base_url, model) = llm.endpoint();
    let api_key = match llm.backend {
        LlmBackend::Ollama => {
            info!(url = %base_url, model = %model, "Using Ollama (local) backend");
            "ollama".to_string() // required by API but ignored
        }
        LlmBackend::Remote => {
            let key = std::env::var("LLM_API_KEY")
                .map_err(|_| ConfigError::MissingCredential("LLM_API_KEY"))?;
            info!(url = %base_url, model = %model, "Using remote API backend");
            key
        }
    };
    Ok(ResolvedEndpoint {
        backend: llm.backend,
        base_url: base_url.trim_end_matches('/').to_string(),
        model: model.to_string(),
        api_key,
    })
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Chat-completions client for the configured backend.
pub struct ChatClient {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl ChatClient {
    /// Resolve the endpoint and make sure it can be used at all.
    ///
    /// Fails when no credential is configured or a local server is down, so
    /// a run is refused before any document is touched.
    pub async fn connect(llm: &LlmSection) -> Result<Self, ServiceError> {
        let endpoint = resolve_endpoint(llm)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()?;

        if endpoint.backend == LlmBackend::Ollama
            && !check_ollama_health(&client, &endpoint.base_url).await
        {
            return Err(ServiceError::Unavailable(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                endpoint.base_url
            )));
        }

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn complete(&self, prompt: &Prompt<'_>) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        debug!(purpose = prompt.purpose.as_str(), url = %url, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ServiceError::EmptyResponse)
    }

    fn name(&self) -> &str {
        match self.endpoint.backend {
            LlmBackend::Ollama => "ollama",
            LlmBackend::Remote => "remote",
        }
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }
}

/// Cut `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
