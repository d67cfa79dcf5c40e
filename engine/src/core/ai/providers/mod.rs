//! AI Provider Implementations
//!
//! Concrete implementations of the AIProvider trait, one per wire protocol
//! family. Several catalog entries may share a family (DeepSeek and Groq both
//! speak the OpenAI protocol with a different base URL).

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::catalog::ProviderDescriptor;
use super::provider::AIProvider;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Provider Family
// =============================================================================

/// Wire protocol spoken by a provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderFamily {
    /// OpenAI chat completions API and compatible gateways
    #[serde(rename = "openai")]
    OpenAICompatible,
    /// Google Gemini generateContent API
    #[serde(rename = "gemini")]
    Gemini,
    /// Anthropic messages API
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderFamily::OpenAICompatible => write!(f, "openai"),
            ProviderFamily::Gemini => write!(f, "gemini"),
            ProviderFamily::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openai-compatible" | "deepseek" | "groq" => {
                Ok(ProviderFamily::OpenAICompatible)
            }
            "gemini" | "google" => Ok(ProviderFamily::Gemini),
            "anthropic" | "claude" => Ok(ProviderFamily::Anthropic),
            _ => Err(format!("Unknown provider family: {}", s)),
        }
    }
}

// =============================================================================
// Provider Factory
// =============================================================================

/// Creates an AI provider for a catalog entry
pub fn create_provider(descriptor: &ProviderDescriptor) -> CoreResult<Arc<dyn AIProvider>> {
    match descriptor.family {
        ProviderFamily::OpenAICompatible => Ok(Arc::new(OpenAIProvider::new(descriptor)?)),
        ProviderFamily::Gemini => Ok(Arc::new(GeminiProvider::new(descriptor)?)),
        ProviderFamily::Anthropic => Ok(Arc::new(AnthropicProvider::new(descriptor)?)),
    }
}

// =============================================================================
// Shared HTTP Helpers
// =============================================================================

#[cfg(feature = "ai-providers")]
pub(crate) fn build_client(timeout_secs: u64) -> CoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Maps a transport error; timeouts and connect failures mean unreachable.
///
/// The URL is stripped so query-string secrets never reach logs.
#[cfg(feature = "ai-providers")]
pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> CoreError {
    let error = error.without_url();
    if error.is_timeout() || error.is_connect() {
        CoreError::ProviderUnreachable {
            provider: provider.to_string(),
            message: error.to_string(),
        }
    } else {
        CoreError::ProviderRequestFailed {
            provider: provider.to_string(),
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

#[cfg_attr(not(feature = "ai-providers"), allow(dead_code))]
pub(crate) fn upstream_error(provider: &str, status: Option<u16>, message: String) -> CoreError {
    CoreError::ProviderRequestFailed {
        provider: provider.to_string(),
        status,
        message,
    }
}

#[cfg(not(feature = "ai-providers"))]
pub(crate) fn feature_disabled() -> CoreError {
    CoreError::NotSupported(
        "AI providers feature not enabled. Build with --features ai-providers".to_string(),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::catalog::ProviderTier;

    #[test]
    fn test_provider_family_parsing() {
        assert_eq!(
            "openai".parse::<ProviderFamily>().unwrap(),
            ProviderFamily::OpenAICompatible
        );
        assert_eq!(
            "DeepSeek".parse::<ProviderFamily>().unwrap(),
            ProviderFamily::OpenAICompatible
        );
        assert_eq!(
            "google".parse::<ProviderFamily>().unwrap(),
            ProviderFamily::Gemini
        );
        assert_eq!(
            "claude".parse::<ProviderFamily>().unwrap(),
            ProviderFamily::Anthropic
        );
        assert!("mistral".parse::<ProviderFamily>().is_err());
    }

    #[test]
    fn test_provider_family_serde_matches_display() {
        for family in [
            ProviderFamily::OpenAICompatible,
            ProviderFamily::Gemini,
            ProviderFamily::Anthropic,
        ] {
            let json = serde_json::to_string(&family).unwrap();
            assert_eq!(json, format!("\"{}\"", family));
        }
    }

    #[test]
    fn test_create_provider_uses_descriptor_id() {
        let descriptor = ProviderDescriptor::new(
            "deepseek",
            ProviderFamily::OpenAICompatible,
            ProviderTier::Stable,
            "deepseek-chat",
        )
        .with_base_url("https://api.deepseek.com/v1");

        let provider = create_provider(&descriptor).unwrap();
        assert_eq!(provider.name(), "deepseek");
        assert_eq!(provider.default_model(), "deepseek-chat");
    }

    #[test]
    fn test_upstream_error_keeps_status() {
        let err = upstream_error("gemini", Some(503), "overloaded".to_string());
        assert_eq!(err.http_status(), Some(503));
    }
}
