//! AI Module
//!
//! Provider access for script generation: credential-aware providers, the
//! tiered catalog, failover, and tolerant decoding of model output.

pub mod catalog;
pub mod failover;
pub mod gateway;
pub mod json_repair;
pub mod provider;
pub mod providers;

pub use catalog::{ProviderCatalog, ProviderDescriptor, ProviderTier};
pub use failover::{
    AttemptLog, AttemptOutcome, ExhaustionDiagnosis, FailoverExecutor, FailoverReport,
    FailoverSuccess, FailureClass, FailureCounts, RetryPolicy, WorkAttempt,
};
pub use gateway::{AIGateway, AIGatewayConfig, GatewayCompletion, ProviderHealth};
pub use json_repair::{DecoderProfile, RecoveredValue, RecoveryMode, ResilientJsonDecoder};
pub use provider::{
    AIProvider, CompletionRequest, CompletionResponse, FinishReason, MockAIProvider, TokenUsage,
};
pub use providers::{
    create_provider, AnthropicProvider, GeminiProvider, OpenAIProvider, ProviderFamily,
};
