//! Anthropic Provider
//!
//! Messages API client. Requests always carry `max_tokens`, which the API
//! requires.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ai::catalog::ProviderDescriptor;
use crate::core::ai::provider::{AIProvider, CompletionRequest, CompletionResponse};
#[cfg(feature = "ai-providers")]
use crate::core::ai::provider::{FinishReason, TokenUsage};
use crate::core::credentials::Credential;
use crate::core::{CoreError, CoreResult, ProviderId};

/// Anthropic requires max_tokens on every request
const DEFAULT_MAX_TOKENS: u32 = 4096;

// =============================================================================
// Anthropic Provider
// =============================================================================

/// Anthropic API provider for Claude models
pub struct AnthropicProvider {
    id: ProviderId,
    #[allow(dead_code)]
    base_url: String,
    default_model: String,
    #[cfg(feature = "ai-providers")]
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Default Anthropic API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    /// API version header
    pub const API_VERSION: &'static str = "2023-06-01";

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
// Anthropic API Types
// =============================================================================

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
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
    error_type: String,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
fn build_request(model: String, request: &CompletionRequest) -> MessagesRequest {
    // No JSON mode here; the system prompt carries the format instruction
    MessagesRequest {
        model,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages: vec![Message {
            role: "user".to_string(),
            content: request.prompt.clone(),
        }],
        system: request.system.clone(),
        temperature: request.temperature,
    }
}

// =============================================================================
// AIProvider Implementation
// =============================================================================

#[async_trait]
impl AIProvider for AnthropicProvider {
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

        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", credential.secret())
            .header("anthropic-version", Self::API_VERSION)
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
                    error_type: "unknown".to_string(),
                },
            });
            return Err(super::upstream_error(
                &self.id,
                Some(status.as_u16()),
                format!("{} - {}", error.error.error_type, error.error.message),
            ));
        }

        let api_response: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            super::upstream_error(&self.id, None, format!("Failed to parse response: {}", e))
        })?;

        let text = api_response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let finish_reason = match api_response.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::Length,
            Some("refusal") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            text,
            model: api_response.model.clone(),
            usage: TokenUsage::new(
                api_response.usage.input_tokens,
                api_response.usage.output_tokens,
            ),
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
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", credential.secret())
            .header("anthropic-version", Self::API_VERSION)
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
