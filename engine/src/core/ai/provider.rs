//! AI Provider Module
//!
//! Defines the capability trait every upstream provider implements and the
//! request/response types passed through it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::credentials::Credential;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// AI Provider Trait
// =============================================================================

/// Trait for upstream AI providers.
///
/// Providers hold no keys of their own; the credential for each call is drawn
/// from the shared pool by the caller.
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Returns the provider name
    fn name(&self) -> &str;

    /// Returns the model used when a request does not name one
    fn default_model(&self) -> &str;

    /// Generates a completion with the given credential
    async fn complete(
        &self,
        credential: &Credential,
        request: CompletionRequest,
    ) -> CoreResult<CompletionResponse>;

    /// Performs a lightweight connectivity/auth check.
    ///
    /// This should be cheap (no completions) and must not leak the secret in
    /// error messages.
    async fn health_check(&self, _credential: &Credential) -> CoreResult<()> {
        Ok(())
    }
}

// =============================================================================
// Completion Request
// =============================================================================

/// Request for text completion
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// System prompt/instructions
    pub system: Option<String>,
    /// User prompt
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Model to use (provider-specific)
    pub model: Option<String>,
    /// Whether to ask for JSON output
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Creates a new completion request
    pub fn new(prompt: &str) -> Self {
        Self {
            system: None,
            prompt: prompt.to_string(),
            max_tokens: None,
            temperature: None,
            model: None,
            json_mode: false,
        }
    }

    /// Sets the system prompt
    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }

    /// Sets the maximum tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the model
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    /// Enables JSON mode
    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

// =============================================================================
// Completion Response
// =============================================================================

/// Response from text completion
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Model used
    pub model: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    /// Creates a new completion response
    pub fn new(text: &str, model: &str) -> Self {
        Self {
            text: text.to_string(),
            model: model.to_string(),
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        }
    }

    /// Whether the output was cut off by the token limit
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::Length
    }
}

// =============================================================================
// Token Usage
// =============================================================================

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates a new token usage record
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    /// Adds another usage record to this one
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// =============================================================================
// Finish Reason
// =============================================================================

/// Reason for completion finish
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal stop
    #[default]
    Stop,
    /// Reached max tokens
    Length,
    /// Content filter triggered
    ContentFilter,
}

// =============================================================================
// Mock Provider (for testing)
// =============================================================================

/// One scripted reply of the mock provider
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Successful completion with this text
    Text(String),
    /// Upstream error with an HTTP status
    Status(u16, String),
    /// Transport failure
    Unreachable(String),
}

type Responder = Box<dyn Fn(&CompletionRequest) -> String + Send + Sync>;

/// Mock AI provider for testing.
///
/// Scripted replies are consumed first, in order; afterwards every call
/// succeeds with the responder output (or the fixed response).
pub struct MockAIProvider {
    name: String,
    response: String,
    script: Mutex<VecDeque<MockReply>>,
    responder: Option<Responder>,
    calls: AtomicUsize,
    credentials_seen: Mutex<Vec<usize>>,
}

impl MockAIProvider {
    /// Creates a new mock provider
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: "Mock response".to_string(),
            script: Mutex::new(VecDeque::new()),
            responder: None,
            calls: AtomicUsize::new(0),
            credentials_seen: Mutex::new(Vec::new()),
        }
    }

    /// Sets the fixed mock response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queues replies consumed before the default response
    pub fn with_script(self, replies: Vec<MockReply>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
        self
    }

    /// Builds successful responses from the request
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> String + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Number of `complete` calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Credential indices used, in call order
    pub fn credentials_seen(&self) -> Vec<usize> {
        self.credentials_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AIProvider for MockAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        credential: &Credential,
        request: CompletionRequest,
    ) -> CoreResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(credential.index());

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let text = match scripted {
            Some(MockReply::Text(text)) => text,
            Some(MockReply::Status(status, message)) => {
                return Err(CoreError::ProviderRequestFailed {
                    provider: self.name.clone(),
                    status: Some(status),
                    message,
                });
            }
            Some(MockReply::Unreachable(message)) => {
                return Err(CoreError::ProviderUnreachable {
                    provider: self.name.clone(),
                    message,
                });
            }
            None => match &self.responder {
                Some(responder) => responder(&request),
                None => self.response.clone(),
            },
        };

        Ok(CompletionResponse {
            text,
            model: request.model.unwrap_or_else(|| "mock-model".to_string()),
            usage: TokenUsage::new(10, 20),
            finish_reason: FinishReason::Stop,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
