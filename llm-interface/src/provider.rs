use async_trait::async_trait;
use serde::de::DeserializeOwned;
use subscout_core::{CoreError, LlmError};

use crate::schema::StructuredOutput;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    /// Strict JSON schema mode; the reply must validate against `schema`.
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub response_format: ResponseFormat,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn text(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            response_format: ResponseFormat::Text,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Request a reply shaped like `T`, using its strict schema.
    pub fn structured<T: StructuredOutput>(
        name: &str,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            response_format: ResponseFormat::JsonSchema {
                name: name.to_string(),
                schema: T::openai_schema(),
            },
            temperature: Some(0.0),
            ..Self::text(system_prompt, user_prompt)
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the raw message content of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CoreError>;
}

/// Run a structured request and decode the content as `T`.
pub async fn complete_structured<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
) -> Result<T, CoreError> {
    let content = provider.complete(request).await?;
    serde_json::from_str(&content).map_err(|e| {
        LlmError::InvalidResponseFormat {
            provider: provider.name().to_string(),
            details: format!("response did not match schema: {e}"),
        }
        .into()
    })
}
