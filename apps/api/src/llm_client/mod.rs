//! LLM client: the single point of entry for all generation API calls.
//!
//! Two providers sit behind one client: the Anthropic Messages API (`claude`)
//! and the Google generateContent API (`gemini`). Both share the same
//! transport retry loop. Pipeline-level retry is separate and lives in
//! `generation::pipeline::RetryPolicy`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::generation::prompts::SlidePrompt;
use crate::models::job::GenerationProvider;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const CLAUDE_MODEL: &str = "claude-sonnet-4-5";
pub const GEMINI_MODEL: &str = "gemini-2.0-flash";
const MAX_TOKENS: u32 = 10_000;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("No API key configured for provider '{0}'")]
    MissingApiKey(&'static str),
}

// ────────────────────────────────────────────────────────────────────────────
// Anthropic wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// HTTP client for both providers. Cheap to clone.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    anthropic_api_key: Option<String>,
    google_api_key: Option<String>,
}

impl LlmClient {
    pub fn new(
        anthropic_api_key: Option<String>,
        google_api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(180))
                .build()?,
            anthropic_api_key,
            google_api_key,
        })
    }

    /// Sends one prompt to `provider` and returns the raw response text.
    pub async fn complete(
        &self,
        provider: GenerationProvider,
        system: &str,
        prompt: &str,
    ) -> Result<String, LlmError> {
        match provider {
            GenerationProvider::Claude => self.call_claude(system, prompt).await,
            GenerationProvider::Gemini => self.call_gemini(system, prompt).await,
        }
    }

    async fn call_claude(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let api_key = self
            .anthropic_api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey("claude"))?;

        let request_body = AnthropicRequest {
            model: CLAUDE_MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let body = self
            .send_with_retry(|| {
                self.client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&request_body)
            })
            .await
            .map_err(|e| match e {
                LlmError::Api { status, message } => LlmError::Api {
                    status,
                    message: serde_json::from_str::<AnthropicError>(&message)
                        .map(|e| e.error.message)
                        .unwrap_or(message),
                },
                other => other,
            })?;

        let response: AnthropicResponse = serde_json::from_str(&body)?;

        debug!(
            "Claude call succeeded: input_tokens={}, output_tokens={}",
            response.usage.input_tokens, response.usage.output_tokens
        );

        response
            .content
            .into_iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text)
            .ok_or(LlmError::EmptyContent)
    }

    async fn call_gemini(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let api_key = self
            .google_api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey("gemini"))?;

        let url = format!("{GEMINI_API_BASE}/{GEMINI_MODEL}:generateContent");
        let request_body = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: system }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: MAX_TOKENS,
            },
        };

        let body = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .header("x-goog-api-key", api_key)
                    .header("content-type", "application/json")
                    .json(&request_body)
            })
            .await
            .map_err(|e| match e {
                LlmError::Api { status, message } => LlmError::Api {
                    status,
                    message: serde_json::from_str::<GeminiError>(&message)
                        .map(|e| e.error.message)
                        .unwrap_or(message),
                },
                other => other,
            })?;

        let response: GeminiResponse = serde_json::from_str(&body)?;

        if let Some(usage) = &response.usage_metadata {
            debug!(
                "Gemini call succeeded: prompt_tokens={:?}, candidate_tokens={:?}",
                usage.prompt_token_count, usage.candidates_token_count
            );
        }

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text)
    }

    /// Sends the request built by `build`, retrying on transport errors,
    /// 429 and 5xx with exponential backoff. Returns the success body.
    async fn send_with_retry<F>(&self, build: F) -> Result<String, LlmError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match build().send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            return Ok(response.text().await?);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Slide generation seam
// ────────────────────────────────────────────────────────────────────────────

/// Turns a slide prompt into slide markup. The pipeline owns retry policy;
/// implementations make a single attempt.
#[async_trait]
pub trait SlideGenerator: Send + Sync {
    async fn generate(
        &self,
        provider: GenerationProvider,
        prompt: &SlidePrompt,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl SlideGenerator for LlmClient {
    async fn generate(
        &self,
        provider: GenerationProvider,
        prompt: &SlidePrompt,
    ) -> Result<String, LlmError> {
        let text = self.complete(provider, &prompt.system, &prompt.user).await?;
        let markup = extract_markup(&text);
        if markup.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(markup.to_string())
    }
}

/// Exponential backoff before retry `attempt` (1-based): 1s, then 2s.
fn backoff_delay(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis(1000 * (1 << (attempt - 1)))
}

/// Returns the body of the first ```html fence, or of a bare ``` fence
/// wrapping the whole reply; otherwise the trimmed reply.
pub fn extract_markup(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```html") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
