//! Gemini Provider
//!
//! `generateContent` client. The key travels in the `x-goog-api-key` header
//! and JSON mode maps to `responseMimeType`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ai::catalog::ProviderDescriptor;
use crate::core::ai::provider::{AIProvider, CompletionRequest, CompletionResponse};
#[cfg(feature = "ai-providers")]
use crate::core::ai::provider::{FinishReason, TokenUsage};
use crate::core::credentials::Credential;
use crate::core::{CoreError, CoreResult, ProviderId};

// =============================================================================
// Gemini Provider
// =============================================================================

/// Google Gemini API provider
pub struct GeminiProvider {
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

impl GeminiProvider {
    /// Default Gemini API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

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
// Gemini API Types
// =============================================================================

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
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
    #[serde(default)]
    status: Option<String>,
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
fn build_request(request: &CompletionRequest) -> GenerateContentRequest {
    let system_instruction = request.system.as_ref().map(|system| Content {
        role: None,
        parts: vec![Part {
            text: system.clone(),
        }],
    });

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        max_output_tokens: request.max_tokens,
        response_mime_type: request
            .json_mode
            .then(|| "application/json".to_string()),
    };

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: request.prompt.clone(),
            }],
        }],
        system_instruction,
        generation_config: Some(generation_config),
    }
}

// =============================================================================
// AIProvider Implementation
// =============================================================================

#[async_trait]
impl AIProvider for GeminiProvider {
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
        let api_request = build_request(&request);

        // Key goes in a header, never the query string
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential.secret())
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
                    status: None,
                },
            });
            let status_str = error.error.status.as_deref().unwrap_or("unknown");
            return Err(super::upstream_error(
                &self.id,
                Some(status.as_u16()),
                format!("status={}: {}", status_str, error.error.message),
            ));
        }

        let api_response: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            super::upstream_error(&self.id, None, format!("Failed to parse response: {}", e))
        })?;

        if let Some(reason) = api_response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_ref())
        {
            return Err(super::upstream_error(
                &self.id,
                None,
                format!("Content blocked by safety filters: {}", reason),
            ));
        }

        let candidate = api_response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| {
                super::upstream_error(&self.id, None, "No candidates returned".to_string())
            })?;

        let text = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let finish_reason = match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = api_response
            .usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            model,
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
            .header("x-goog-api-key", credential.secret())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::catalog::ProviderTier;
    use crate::core::ai::providers::ProviderFamily;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(
            "gemini",
            ProviderFamily::Gemini,
            ProviderTier::Stable,
            "gemini-2.5-flash",
        )
    }

    #[test]
    fn test_gemini_provider_creation() {
        let provider = GeminiProvider::new(&descriptor()).unwrap();

        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.default_model(), "gemini-2.5-flash");
        assert_eq!(provider.base_url, GeminiProvider::DEFAULT_BASE_URL);
    }

    #[test]
    fn test_build_request_uses_system_instruction() {
        let request = CompletionRequest::new("Write scene 1")
            .with_system("Return JSON only.")
            .with_max_tokens(2048)
            .with_json_mode();
        let api_request = build_request(&request);

        let system = api_request.system_instruction.as_ref().unwrap();
        assert!(system.role.is_none());
        assert_eq!(system.parts[0].text, "Return JSON only.");
        assert_eq!(api_request.contents.len(), 1);
        assert_eq!(api_request.contents[0].role.as_deref(), Some("user"));

        let json = serde_json::to_value(&api_request).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_build_request_without_json_mode() {
        let api_request = build_request(&CompletionRequest::new("Hi"));

        assert!(api_request.system_instruction.is_none());
        let json = serde_json::to_value(&api_request).unwrap();
        assert!(json["generationConfig"].get("responseMimeType").is_none());
    }
}
