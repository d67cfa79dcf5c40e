//! Batch Generators
//!
//! A batch generator turns one [`BatchRequest`] into scenes. The production
//! generator goes through the AI gateway and the resilient decoder.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{normalize_scenes, BatchPromptBuilder, BatchRequest, ScriptScene};
use crate::core::ai::{
    AIGateway, CompletionRequest, DecoderProfile, RecoveryMode, ResilientJsonDecoder, TokenUsage,
};
use crate::core::{CoreResult, ProviderId};

/// Scenes produced for one batch
#[derive(Clone, Debug)]
pub struct BatchOutput {
    pub scenes: Vec<ScriptScene>,
    /// How the response was decoded
    pub mode: RecoveryMode,
    /// Script title, if the response named one
    pub title: Option<String>,
    /// Provider that answered
    pub provider: Option<ProviderId>,
    /// Provider calls made, retries included
    pub attempts: usize,
    pub usage: TokenUsage,
}

impl BatchOutput {
    /// Output with scenes only (mocks, tests)
    pub fn from_scenes(scenes: Vec<ScriptScene>, mode: RecoveryMode) -> Self {
        Self {
            scenes,
            mode,
            title: None,
            provider: None,
            attempts: 1,
            usage: TokenUsage::default(),
        }
    }
}

/// Produces the scenes of one batch
#[async_trait]
pub trait BatchGenerator: Send + Sync {
    /// Generates a batch.
    ///
    /// Errors mean the batch produced nothing usable; only
    /// [`CoreError::Cancelled`](crate::core::CoreError::Cancelled) stops the job.
    async fn generate(
        &self,
        batch: &BatchRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<BatchOutput>;
}

/// Generator backed by the multi-provider gateway
pub struct GatewayBatchGenerator {
    gateway: Arc<AIGateway>,
    prompts: Arc<dyn BatchPromptBuilder>,
    decoder: ResilientJsonDecoder,
    preferred: Option<ProviderId>,
}

impl GatewayBatchGenerator {
    pub fn new(gateway: Arc<AIGateway>, prompts: Arc<dyn BatchPromptBuilder>) -> Self {
        Self {
            gateway,
            prompts,
            decoder: ResilientJsonDecoder::new(DecoderProfile::script_scenes()),
            preferred: None,
        }
    }

    /// Tries this provider first for every batch
    pub fn with_preferred(mut self, provider: Option<&str>) -> Self {
        self.preferred = provider.map(str::to_string);
        self
    }
}

#[async_trait]
impl BatchGenerator for GatewayBatchGenerator {
    async fn generate(
        &self,
        batch: &BatchRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<BatchOutput> {
        let prompt = self.prompts.build(batch);
        let request = CompletionRequest::new(&prompt.user)
            .with_system(&prompt.system)
            .with_json_mode();

        let completion = self
            .gateway
            .complete(request, self.preferred.as_deref(), cancel)
            .await?;

        if completion.response.is_truncated() {
            debug!(range = %batch.range, "Response hit the token limit");
        }

        let recovered = self.decoder.decode(&completion.response.text);
        let normalized = normalize_scenes(&recovered);

        info!(
            job = %batch.job_id,
            range = %batch.range,
            provider = %completion.provider,
            mode = %normalized.mode,
            scenes = normalized.scenes.len(),
            "Batch generated"
        );

        Ok(BatchOutput {
            scenes: normalized.scenes,
            mode: normalized.mode,
            title: normalized.title,
            provider: Some(completion.provider),
            attempts: completion.attempts.calls(),
            usage: completion.response.usage,
        })
    }
}
