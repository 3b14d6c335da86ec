//! Generative model client and extraction of scene code from its reply.

use crate::config::GeminiConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// Sampling temperature for scene generation. Kept low so the same course
/// produces near-identical code across calls.
pub const TEMPERATURE: f32 = 0.3;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("generative model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generative model returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("generative model returned no text")]
    Empty,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Sends `prompt` and returns the raw completion text.
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Option<String> {
        let parts = self.candidates.into_iter().next()?.content?.parts;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(cfg: &GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        debug!(prompt_len = prompt.len(), "sending generateContent request");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parsed.into_text().ok_or(GeneratorError::Empty)
    }
}

/// Pulls source code out of a model reply.
///
/// Takes the first ```` ```python ```` block, else the first fenced block of
/// any kind, else the whole trimmed reply. No syntax checking happens here.
pub fn extract_code(raw: &str) -> String {
    let text = raw.trim();

    if let Some((_, rest)) = text.split_once("```python") {
        return first_fence_body(rest).trim().to_string();
    }
    if let Some((_, rest)) = text.split_once("```") {
        let body = first_fence_body(rest);
        // drop an info string such as ```py on the opening line
        let body = match body.split_once('\n') {
            Some((first, tail)) if is_info_string(first) => tail,
            _ => body,
        };
        return body.trim().to_string();
    }
    text.to_string()
}

fn first_fence_body(after_open: &str) -> &str {
    after_open
        .split_once("```")
        .map(|(body, _)| body)
        .unwrap_or(after_open)
}

fn is_info_string(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && line.len() <= 16
        && line
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+')
}
