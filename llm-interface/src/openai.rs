use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use subscout_core::{CoreError, LlmConfig, LlmError};
use tracing::{debug, warn};

use crate::provider::{CompletionRequest, LlmProvider, ResponseFormat};

const PROVIDER: &str = "openai";

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, CoreError> {
        let api_key = config.api_key()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let response_format = match &request.response_format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonSchema { name, schema } => Some(WireResponseFormat {
                format_type: "json_schema",
                json_schema: WireJsonSchema {
                    name,
                    strict: true,
                    schema,
                },
            }),
        };

        ChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                WireMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CoreError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, "LLM completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let details = response.text().await.unwrap_or_default();
            let error = map_status(status, retry_after, details, &self.model);
            warn!(status = %status, "LLM request failed: {}", error);
            return Err(error.into());
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
                details: format!("undecodable body: {e}"),
            }
        })?;

        extract_content(body)
    }
}

fn extract_content(body: ChatResponse) -> Result<String, CoreError> {
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details: "no choices in response".to_string(),
        }
    })?;

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
        return Err(LlmError::ContentFiltered { reason: refusal }.into());
    }
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(LlmError::ContentFiltered {
            reason: "completion stopped by content filter".to_string(),
        }
        .into());
    }

    choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
                details: "empty message content".to_string(),
            }
            .into()
        })
}

fn map_status(
    status: StatusCode,
    retry_after: Option<u64>,
    details: String,
    model: &str,
) -> LlmError {
    match status.as_u16() {
        401 => LlmError::InvalidApiKey {
            provider: PROVIDER.to_string(),
        },
        404 => LlmError::ModelNotAvailable {
            model: model.to_string(),
        },
        429 => LlmError::RateLimitExceeded {
            provider: PROVIDER.to_string(),
            retry_after: retry_after.unwrap_or(1),
        },
        code if status.is_server_error() => LlmError::ServiceUnavailable {
            provider: PROVIDER.to_string(),
            status_code: code,
        },
        code => LlmError::RequestRejected {
            provider: PROVIDER.to_string(),
            status_code: code,
            details,
        },
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<f64>().ok().map(|secs| secs.max(0.0).ceil() as u64)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: WireJsonSchema<'a>,
}

#[derive(Debug, Serialize)]
struct WireJsonSchema<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}
