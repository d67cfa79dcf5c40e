//! Scriptwright Error Definitions
//!
//! Defines error types used throughout the pipeline.

use thiserror::Error;

use super::ai::FailoverReport;
use super::ProviderId;

/// Core pipeline error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Provider {provider} request failed{}: {message}", status_suffix(.status))]
    ProviderRequestFailed {
        provider: ProviderId,
        status: Option<u16>,
        message: String,
    },

    #[error("Provider {provider} unreachable: {message}")]
    ProviderUnreachable { provider: ProviderId, message: String },

    #[error("Provider not found: {0}")]
    ProviderNotFound(ProviderId),

    #[error("No credentials configured for provider: {0}")]
    NoCredentials(ProviderId),

    #[error("No providers configured")]
    NoProvidersConfigured,

    #[error("{0}")]
    ProvidersExhausted(FailoverReport),

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Billing Errors
    // =========================================================================
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Billing failed: {0}")]
    BillingFailed(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Settings error: {0}")]
    SettingsError(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core pipeline result type
pub type CoreResult<T> = Result<T, CoreError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl CoreError {
    /// Returns the upstream HTTP status carried by the error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CoreError::ProviderRequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Converts to a message suitable for end users.
    ///
    /// Provider exhaustion is the only hard failure a caller sees, so it gets
    /// an actionable hint instead of the raw attempt summary.
    pub fn to_user_message(&self) -> String {
        match self {
            CoreError::ProvidersExhausted(report) => report.diagnosis().user_hint().to_string(),
            CoreError::InsufficientCredits { .. } => {
                "Not enough credits for this generation.".to_string()
            }
            CoreError::Cancelled => "Generation was cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display_with_status() {
        let err = CoreError::ProviderRequestFailed {
            provider: "openai".to_string(),
            status: Some(429),
            message: "slow down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Provider openai request failed (429): slow down"
        );
        assert_eq!(err.http_status(), Some(429));
    }

    #[test]
    fn test_provider_error_display_without_status() {
        let err = CoreError::ProviderRequestFailed {
            provider: "gemini".to_string(),
            status: None,
            message: "empty body".to_string(),
        };
        assert_eq!(err.to_string(), "Provider gemini request failed: empty body");
        assert_eq!(err.http_status(), None);
    }

    #[test]
    fn test_user_message_for_credits() {
        let err = CoreError::InsufficientCredits {
            required: 10,
            available: 3,
        };
        assert!(err.to_user_message().contains("credits"));
    }
}
