//! OpenAI-compatible streaming chat completions client.
//!
//! `POST {base_url}/chat/completions` with `stream: true`; the response is
//! an SSE stream of `{"choices":[{"delta":{"content":"..."}}]}` chunks,
//! concatenated into one string.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{ChatMessage, ProviderError, ProviderResult, TextModel};
use crate::sse::{SseData, data_stream};

/// Default delay suggested for a 429 without a `retry-after` header.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// API base URL, e.g. `https://api.anthropic.com/v1`.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model id sent with every request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Response token cap.
    pub max_tokens: u32,
    /// Whole-request timeout.
    pub timeout: Duration,
}

/// Streaming chat completions client.
pub struct ChatClient {
    config: ChatClientConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl ChatClient {
    /// Build a client. Fails only if the HTTP client cannot be constructed.
    pub fn new(config: ChatClientConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Endpoint URL.
    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key)).map_err(
            |e| ProviderError::Auth {
                message: format!("Invalid authorization header: {e}"),
            },
        )?;
        let _ = headers.insert(AUTHORIZATION, bearer);
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        Ok(headers)
    }
}

#[async_trait]
impl TextModel for ChatClient {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let url = self.url();
        debug!(model = %self.config.model, message_count = messages.len(), %url, "sending chat completion");

        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            stream: true,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_ms);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body, retry_after_ms));
        }

        let mut text = String::new();
        let mut chunks = 0usize;
        let mut done = false;
        let mut items = Box::pin(data_stream(response.bytes_stream()));
        while let Some(item) = items.next().await {
            let line = match item? {
                SseData::Data(line) => line,
                SseData::Done => {
                    done = true;
                    break;
                }
            };
            let chunk: CompletionChunk = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable completion chunk");
                    continue;
                }
            };
            if let Some(err) = chunk.error {
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: err.message.unwrap_or_else(|| "stream error".into()),
                    code: err.kind,
                    retryable: false,
                });
            }
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }
            }
            chunks += 1;
        }

        // A body that ends without the terminator was cut off mid-reply.
        if !done {
            warn!(chunks, partial_len = text.len(), "completion stream ended without [DONE]");
            return Err(ProviderError::SseParse {
                message: format!("stream ended before [DONE] after {chunks} chunks"),
            });
        }

        debug!(chunks, response_len = text.len(), "chat completion finished");
        Ok(text)
    }
}

/// Map a non-2xx response to a [`ProviderError`].
fn status_error(status: u16, body: &str, retry_after_ms: Option<u64>) -> ProviderError {
    let (message, code) = parse_error_body(body, status);
    match status {
        401 | 403 => ProviderError::Auth { message },
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(DEFAULT_RETRY_AFTER_MS),
            message,
        },
        _ => ProviderError::Api {
            status,
            message,
            code,
            retryable: status >= 500,
        },
    }
}

fn parse_error_body(body: &str, status: u16) -> (String, Option<String>) {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let error = &json["error"];
        if let Some(message) = error["message"].as_str().or_else(|| json["message"].as_str()) {
            return (message.to_owned(), error["type"].as_str().map(String::from));
        }
    }
    if body.trim().is_empty() {
        (format!("HTTP {status}"), None)
    } else {
        (format!("HTTP {status}: {}", body.trim()), None)
    }
}

/// `retry-after` in whole seconds.
fn parse_retry_after_ms(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|s| s.saturating_mul(1000))
}
