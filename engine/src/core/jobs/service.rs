//! Script Service
//!
//! Entry point for hosts: validates a generation request, checks credits,
//! runs the orchestrator over the AI gateway, and charges the job key once
//! the first batch is accepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    BatchContinuityOrchestrator, BatchPromptBuilder, FirstBatchHook, GatewayBatchGenerator,
    GenerationJob, JobResult, ScriptPromptBuilder,
};
use crate::core::ai::{AIGateway, ProviderHealth};
use crate::core::billing::{BillingLedger, ChargeOutcome};
use crate::core::credentials::CredentialPool;
use crate::core::settings::{GenerationSettings, PipelineSettings};
use crate::core::{CoreError, CoreResult, JobKey};

/// A request to generate a script
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateJobRequest {
    pub topic: String,
    pub total_scenes: u32,
    /// Overrides the configured batch size
    #[serde(default)]
    pub scenes_per_batch: Option<u32>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Idempotency key; a fresh job id is used when absent
    #[serde(default)]
    pub job_key: Option<JobKey>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub seconds_per_scene: Option<u32>,
}

impl GenerateJobRequest {
    pub fn new(topic: &str, total_scenes: u32) -> Self {
        Self {
            topic: topic.to_string(),
            total_scenes,
            ..Default::default()
        }
    }
}

/// Charges the job key when the first batch commits
struct ChargeOnFirstBatch {
    ledger: Arc<dyn BillingLedger>,
    key: JobKey,
    amount: u64,
    charged: AtomicBool,
}

#[async_trait]
impl FirstBatchHook for ChargeOnFirstBatch {
    async fn on_first_batch(&self, job: &GenerationJob) -> CoreResult<()> {
        if self.ledger.is_charged(&self.key).await? {
            info!(job = %job.id, key = %self.key, "Job key already charged, skipping charge");
            self.charged.store(true, Ordering::SeqCst);
            return Ok(());
        }

        match self.ledger.charge_once(&self.key, self.amount).await? {
            ChargeOutcome::Charged => {
                info!(job = %job.id, key = %self.key, amount = self.amount, "Charged on first batch");
            }
            ChargeOutcome::AlreadyCharged => {
                info!(job = %job.id, key = %self.key, "Job key charged concurrently");
            }
        }
        self.charged.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Script generation over the AI gateway with billing
pub struct ScriptService {
    gateway: Arc<AIGateway>,
    ledger: Arc<dyn BillingLedger>,
    settings: GenerationSettings,
}

impl ScriptService {
    pub fn new(
        gateway: Arc<AIGateway>,
        ledger: Arc<dyn BillingLedger>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            gateway,
            ledger,
            settings,
        }
    }

    /// Builds the gateway from pipeline settings
    pub fn from_settings(
        settings: &PipelineSettings,
        pool: Arc<CredentialPool>,
        ledger: Arc<dyn BillingLedger>,
    ) -> CoreResult<Self> {
        if settings.providers.is_empty() {
            return Err(CoreError::NoProvidersConfigured);
        }
        let gateway = AIGateway::new(
            settings.catalog(),
            pool,
            settings.failover.retry_policy(),
            settings.generation.gateway_config(),
        )?;
        Ok(Self::new(
            Arc::new(gateway),
            ledger,
            settings.generation.clone(),
        ))
    }

    pub fn gateway(&self) -> &Arc<AIGateway> {
        &self.gateway
    }

    /// Credits a request costs
    pub fn cost_of(&self, request: &GenerateJobRequest) -> u64 {
        u64::from(request.total_scenes).saturating_mul(self.settings.credit_per_unit)
    }

    /// Per-provider key health
    pub fn health(&self) -> Vec<ProviderHealth> {
        self.gateway.health()
    }

    fn validate(&self, request: &GenerateJobRequest) -> CoreResult<u32> {
        if request.topic.trim().is_empty() {
            return Err(CoreError::ValidationError("topic is empty".to_string()));
        }
        if request.total_scenes == 0 || request.total_scenes > self.settings.max_units {
            return Err(CoreError::ValidationError(format!(
                "scene count must be between 1 and {}",
                self.settings.max_units
            )));
        }
        let per_batch = request
            .scenes_per_batch
            .unwrap_or(self.settings.units_per_batch);
        if per_batch == 0 {
            return Err(CoreError::ValidationError(
                "scenes per batch must be at least 1".to_string(),
            ));
        }
        Ok(per_batch)
    }

    /// Generates a script.
    ///
    /// Credits are checked up front and charged once, after the first batch
    /// is accepted. A key that was already charged is never charged again.
    pub async fn generate(
        &self,
        request: GenerateJobRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<JobResult> {
        let mut prompts = ScriptPromptBuilder::new(&request.topic);
        if let Some(tone) = &request.tone {
            prompts = prompts.with_tone(tone);
        }
        if let Some(language) = &request.language {
            prompts = prompts.with_language(language);
        }
        if let Some(seconds) = request.seconds_per_scene {
            prompts = prompts.with_seconds_per_scene(seconds);
        }
        self.generate_with(request, Arc::new(prompts), cancel).await
    }

    /// Generates with a caller-supplied prompt builder.
    ///
    /// Billing and validation are the same as [`Self::generate`]; only the
    /// prompts sent for each batch differ.
    pub async fn generate_with(
        &self,
        request: GenerateJobRequest,
        prompts: Arc<dyn BatchPromptBuilder>,
        cancel: &CancellationToken,
    ) -> CoreResult<JobResult> {
        let per_batch = self.validate(&request)?;
        let job = GenerationJob::new(request.total_scenes, per_batch)?;
        let key = request
            .job_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| job.id.clone());
        let cost = self.cost_of(&request);

        let already_charged = self.ledger.is_charged(&key).await?;
        if !already_charged {
            let available = self.ledger.balance().await?;
            if available < cost {
                return Err(CoreError::InsufficientCredits {
                    required: cost,
                    available,
                });
            }
        }

        let generator = GatewayBatchGenerator::new(Arc::clone(&self.gateway), prompts)
            .with_preferred(request.preferred_provider.as_deref());
        let orchestrator =
            BatchContinuityOrchestrator::new(generator).with_pacing(self.settings.pacing());

        let hook = ChargeOnFirstBatch {
            ledger: Arc::clone(&self.ledger),
            key: key.clone(),
            amount: cost,
            charged: AtomicBool::new(already_charged),
        };

        info!(job = %job.id, key = %key, scenes = request.total_scenes, cost, "Generating script");
        let mut result = orchestrator.run(job, Some(&hook), cancel).await?;
        result.job_key = Some(key);
        result.charged = hook.charged.load(Ordering::SeqCst);
        Ok(result)
    }
}
