//! OpenAI-Compatible Provider Implementation
//!
//! Implements the AIProvider trait for the OpenAI chat completions API and
//! gateways that speak it (DeepSeek, Groq, self-hosted proxies).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ai::catalog::ProviderDescriptor;
use crate::core::ai::provider::{AIProvider, CompletionRequest, CompletionResponse};
#[cfg(feature = "ai-providers")]
use crate::core::ai::provider::{FinishReason, TokenUsage};
use crate::core::credentials::Credential;
use crate::core::{CoreError, CoreResult, ProviderId};

// =============================================================================
// OpenAI Provider
// =============================================================================

/// Provider for OpenAI-compatible chat completion endpoints
pub struct OpenAIProvider {
    /// Catalog id, used in errors and logs
    id: ProviderId,
    /// Base URL for API requests
    #[allow(dead_code)]
    base_url: String,
    /// Default model
    default_model: String,
    /// HTTP client
    #[cfg(feature = "ai-providers")]
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Default OpenAI API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Creates a provider for a catalog entry
    pub fn new(descriptor: &ProviderDescriptor) -> CoreResult<Self> {
        if descriptor.model.trim().is_empty() {
            return Err(CoreError::ValidationError(format!(
                "Provider {} has no model configured",
                descriptor.id
            )));
        }

        let base_url = descriptor
            .base_url
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            id: descriptor.id.clone(),
            base_url,
            default_model: descriptor.model.clone(),
            #[cfg(feature = "ai-providers")]
            client: super::build_client(descriptor.timeout_secs)?,
        })
    }
}

// =============================================================================
// OpenAI API Types
// =============================================================================

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    model: String,
    usage: Option<ApiUsage>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
fn build_request(model: String, request: &CompletionRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: request.prompt.clone(),
    });

    ChatCompletionRequest {
        model,
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        response_format: request.json_mode.then(|| ResponseFormat {
            format_type: "json_object".to_string(),
        }),
    }
}

// =============================================================================
// AIProvider Implementation
// =============================================================================

#[async_trait]
impl AIProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    #[cfg(feature = "ai-providers")]
    async fn complete(
        &self,
        credential: &Credential,
        request: CompletionRequest,
    ) -> CoreResult<CompletionResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let api_request = build_request(model, &request);

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.secret())
            .json(&api_request)
            .send()
            .await
            .map_err(|e| super::transport_error(&self.id, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| super::transport_error(&self.id, e))?;

        if !status.is_success() {
            let error: ApiError = serde_json::from_str(&body).unwrap_or(ApiError {
                error: ApiErrorDetail {
                    message: body.clone(),
                    error_type: None,
                },
            });
            let error_type = error.error.error_type.as_deref().unwrap_or("unknown");
            return Err(super::upstream_error(
                &self.id,
                Some(status.as_u16()),
                format!("type={}: {}", error_type, error.error.message),
            ));
        }

        let api_response: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            super::upstream_error(&self.id, None, format!("Failed to parse response: {}", e))
        })?;

        let choice = api_response.choices.first().ok_or_else(|| {
            super::upstream_error(&self.id, None, "No completion choices returned".to_string())
        })?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = api_response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text: choice.message.content.clone().unwrap_or_default(),
            model: api_response.model.clone(),
            usage,
            finish_reason,
        })
    }

    #[cfg(not(feature = "ai-providers"))]
    async fn complete(
        &self,
        _credential: &Credential,
        _request: CompletionRequest,
    ) -> CoreResult<CompletionResponse> {
        Err(super::feature_disabled())
    }

    #[cfg(feature = "ai-providers")]
    async fn health_check(&self, credential: &Credential) -> CoreResult<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.secret())
            .send()
            .await
            .map_err(|e| super::transport_error(&self.id, e))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable response body>".to_string());

        Err(super::upstream_error(
            &self.id,
            Some(status.as_u16()),
            format!("health check failed: {}", body),
        ))
    }

    #[cfg(not(feature = "ai-providers"))]
    async fn health_check(&self, _credential: &Credential) -> CoreResult<()> {
        Err(super::feature_disabled())
    }
}

// =============================================================================
// Tests
// =============================================================================
