//! Vision API transport: one chat-completions call per page.
//!
//! [`VisionClient`] is the seam between retry logic and the wire. The
//! production [`OpenAiVisionClient`] speaks the OpenAI chat-completions
//! protocol (also served by Azure, LiteLLM, vLLM, Ollama and friends) and
//! maps every HTTP outcome onto a [`RequestError`] so the invoker can
//! decide whether to retry.

use crate::config::{ImageDetail, OcrConfig};
use crate::error::{OcrError, RequestError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Everything needed to extract text from one page image.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    pub model: String,
    pub system_prompt: String,
    pub instruction: String,
    /// `data:` URI of the page image.
    pub image_url: String,
    pub detail: ImageDetail,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Sends one request to a vision-capable model.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, RequestError>;
}

// ── Wire format ──────────────────────────────────────────────────────────

/// Chat-completions request body, borrowing from a [`VisionRequest`].
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: ImageDetail,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Lay out a [`VisionRequest`] as the chat-completions JSON body.
pub fn build_request_body(request: &VisionRequest) -> ChatRequest<'_> {
    ChatRequest {
        model: &request.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: vec![ContentPart::Text {
                    text: &request.system_prompt,
                }],
            },
            ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: &request.instruction,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: &request.image_url,
                            detail: request.detail,
                        },
                    },
                ],
            },
        ],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Parse a 2xx chat-completions body.
pub fn parse_response_body(body: &str) -> Result<VisionResponse, RequestError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| RequestError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RequestError::MalformedResponse("response has no choices".into()))?
        .message
        .content
        .unwrap_or_default();

    let usage = parsed
        .usage
        .ok_or_else(|| RequestError::MalformedResponse("response has no usage block".into()))?;

    Ok(VisionResponse {
        text,
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    })
}

/// Map a non-2xx status onto the retry taxonomy.
pub fn classify_status(status: StatusCode, body: &str, retry_after_secs: Option<u64>) -> RequestError {
    let detail = error_detail(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => RequestError::RateLimited { retry_after_secs },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RequestError::Auth {
            status: status.as_u16(),
            detail,
        },
        StatusCode::REQUEST_TIMEOUT => RequestError::Server {
            status: status.as_u16(),
            detail,
        },
        s if s.is_server_error() => RequestError::Server {
            status: s.as_u16(),
            detail,
        },
        s => RequestError::BadRequest {
            status: s.as_u16(),
            detail,
        },
    }
}

/// Pull `error.message` out of an OpenAI-style error body, else truncate raw text.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorInner,
    }
    #[derive(Deserialize)]
    struct ErrorInner {
        message: String,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error.message;
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}…", trimmed.chars().take(200).collect::<String>())
    } else if trimmed.is_empty() {
        "(empty body)".to_string()
    } else {
        trimmed.to_string()
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

// ── OpenAI-compatible client ─────────────────────────────────────────────

/// Chat-completions client over `reqwest`.
#[derive(Debug, Clone)]
pub struct OpenAiVisionClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiVisionClient {
    /// Build a client from the run configuration.
    ///
    /// # Errors
    /// [`OcrError::MissingApiKey`] when the key is blank or a placeholder.
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        if !config.has_api_key() {
            return Err(OcrError::MissingApiKey {
                hint: "Set OPENAI_API_KEY, pass --api-key, or fill \"api_key\" in the settings file."
                    .to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(30)))
            .build()
            .map_err(|e| OcrError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.trim().to_string(),
            timeout_secs: config.request_timeout_secs,
        })
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, RequestError> {
        let body = build_request_body(request);

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RequestError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    RequestError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after_secs = retry_after(response.headers());
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                RequestError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                RequestError::Network(e.to_string())
            }
        })?;
        trace!(%status, bytes = text.len(), "Vision API response");

        if !status.is_success() {
            return Err(classify_status(status, &text, retry_after_secs));
        }
        parse_response_body(&text)
    }
}
