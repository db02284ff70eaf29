//! Generative backends.
//!
//! Concrete [`GenerativeBackend`] implementations:
//! - **[`DisabledBackend`]**: always fails permanently; used when no provider is configured.
//! - **[`GeminiBackend`]**: Google Generative Language REST API (`generateContent`).
//! - **[`OllamaBackend`]**: a local Ollama instance's `/api/generate`.
//!
//! # Error tagging
//!
//! - HTTP 408, 429 and 5xx, timeouts, connection failures → `Transient`
//! - any other non-success status → `Permanent`
//! - a success response whose envelope cannot be read → `MalformedResponse`
//!
//! Backends make exactly one request per call; the orchestrator owns retries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use testforge_core::backend::{CompletionOptions, GenerativeBackend};
use testforge_core::{Error, Result};

use crate::config::GenerationSettings;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Instantiate the backend named in `settings.provider`.
pub fn create_backend(settings: &GenerationSettings) -> anyhow::Result<Arc<dyn GenerativeBackend>> {
    match settings.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "gemini" => Ok(Arc::new(GeminiBackend::new(settings)?)),
        "ollama" => Ok(Arc::new(OllamaBackend::new(settings)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Client without its own timeout: the orchestrator bounds each attempt.
fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

// ============ Disabled ============

pub struct DisabledBackend;

#[async_trait]
impl GenerativeBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String> {
        Err(Error::Permanent(
            "generation provider is disabled; set [generation].provider".to_string(),
        ))
    }
}

// ============ Gemini ============

/// Requires the `GEMINI_API_KEY` environment variable.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(settings: &GenerationSettings) -> anyhow::Result<Self> {
        let model = settings
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider `gemini` needs [generation].model"))?;
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;
        let base_url = settings
            .url
            .clone()
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string());

        Ok(Self {
            client: http_client()?,
            api_key,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let mut generation_config = serde_json::json!({ "temperature": options.temperature });
        if let Some(max) = options.max_output_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max);
        }
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
            "safetySettings": [
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE" },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE" },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE" },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE" }
            ]
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let json = send(
            self.client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body),
            "Gemini",
        )
        .await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate `candidates[0].content.parts[].text`.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(Error::Permanent(format!("prompt blocked by Gemini: {}", reason)));
    }
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            Error::MalformedResponse("Gemini response has no candidate content".to_string())
        })?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(Error::MalformedResponse("Gemini returned empty text".to_string()));
    }
    Ok(text)
}

// ============ Ollama ============

pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(settings: &GenerationSettings) -> anyhow::Result<Self> {
        let model = settings
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider `ollama` needs [generation].model"))?;
        let url = settings
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
        Ok(Self {
            client: http_client()?,
            url,
            model,
        })
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let mut opts = serde_json::json!({ "temperature": options.temperature });
        if let Some(max) = options.max_output_tokens {
            opts["num_predict"] = serde_json::json!(max);
        }
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": opts,
        });
        let json = send(
            self.client
                .post(format!("{}/api/generate", self.url.trim_end_matches('/')))
                .json(&body),
            "Ollama",
        )
        .await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::MalformedResponse("Ollama response missing \"response\" field".to_string())
            })
    }
}

// ============ Shared ============

async fn send(request: reqwest::RequestBuilder, provider: &str) -> Result<serde_json::Value> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            Error::Transient(format!("{} request timed out", provider))
        } else {
            Error::Transient(format!("{} connection error: {}", provider, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &format!("{} API error {}: {}", provider, status, body_text)));
    }

    let json = response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| Error::MalformedResponse(format!("{} returned invalid JSON: {}", provider, e)))?;
    debug!(provider, "backend call succeeded");
    Ok(json)
}

/// Tag a non-success HTTP status as retryable or not.
pub fn classify_status(status: StatusCode, message: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Error::Transient(message.to_string())
    } else {
        Error::Permanent(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "x").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "x").is_transient());
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "x"),
            Error::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "x"),
            Error::Permanent(_)
        ));
    }

    #[test]
    fn test_gemini_envelope() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "[{\"a\":" }, { "text": "1}]" }] } }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "[{\"a\":1}]");

        let empty = serde_json::json!({ "candidates": [] });
        assert!(matches!(
            parse_gemini_response(&empty),
            Err(Error::MalformedResponse(_))
        ));

        let blocked = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(parse_gemini_response(&blocked), Err(Error::Permanent(_))));
    }

    #[tokio::test]
    async fn test_disabled_backend_is_permanent() {
        let b = create_backend(&GenerationSettings::default()).unwrap();
        let err = b.complete("p", &CompletionOptions::default()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
