//! Batch Continuity Orchestrator
//!
//! Drives a [`GenerationJob`] batch by batch. Batches run strictly in order;
//! each one is seeded with the anchor of the last accepted scene. A failed
//! batch is skipped and the job continues degraded. Only cancellation and a
//! failing first-batch hook end a job early.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{BatchGenerator, BatchRequest, BatchSummary, GenerationJob, JobResult};
use crate::core::ai::failover::sleep_or_cancel;
use crate::core::ai::TokenUsage;
use crate::core::{CoreError, CoreResult};

/// Runs once, right after the first batch of a job is accepted
#[async_trait]
pub trait FirstBatchHook: Send + Sync {
    /// An error aborts the job
    async fn on_first_batch(&self, job: &GenerationJob) -> CoreResult<()>;
}

/// Sequential batch driver
pub struct BatchContinuityOrchestrator<G> {
    generator: G,
    pacing: Duration,
}

impl<G: BatchGenerator> BatchContinuityOrchestrator<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            pacing: Duration::ZERO,
        }
    }

    /// Delay between consecutive batches
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Runs every batch of `job` and returns the stitched result.
    ///
    /// Cancellation stops before the next batch (or during pacing) and
    /// returns what was accumulated, flagged `cancelled`.
    pub async fn run(
        &self,
        mut job: GenerationJob,
        hook: Option<&dyn FirstBatchHook>,
        cancel: &CancellationToken,
    ) -> CoreResult<JobResult> {
        let started_at = Utc::now();
        let mut batches: Vec<BatchSummary> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut cancelled = false;

        info!(
            job = %job.id,
            total = job.total_units,
            per_batch = job.units_per_batch,
            "Starting generation job"
        );

        while let Some(range) = job.next_range() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if !batches.is_empty() && sleep_or_cancel(self.pacing, cancel).await.is_err() {
                cancelled = true;
                break;
            }

            let request = BatchRequest {
                job_id: job.id.clone(),
                range,
                total_units: job.total_units,
                anchor: job.anchor.clone(),
            };

            match self.generator.generate(&request, cancel).await {
                Ok(output) => {
                    usage.accumulate(&output.usage);
                    let first_commit = job.committed_batches() == 0;
                    let appended = job.commit(range, output.scenes, output.mode, output.title);

                    batches.push(BatchSummary {
                        range,
                        provider: output.provider,
                        mode: Some(output.mode),
                        scenes: appended,
                        attempts: output.attempts,
                        error: (appended == 0).then(|| "no usable scenes".to_string()),
                    });

                    if appended == 0 {
                        warn!(job = %job.id, range = %range, "Batch returned no usable scenes, skipping");
                    } else if first_commit {
                        if let Some(hook) = hook {
                            if let Err(e) = hook.on_first_batch(&job).await {
                                error!(job = %job.id, error = %e, "First-batch hook failed, aborting job");
                                return Err(e);
                            }
                        }
                    }
                }
                Err(CoreError::Cancelled) => {
                    cancelled = true;
                    batches.push(BatchSummary {
                        range,
                        provider: None,
                        mode: None,
                        scenes: 0,
                        attempts: 0,
                        error: Some(CoreError::Cancelled.to_string()),
                    });
                    break;
                }
                Err(e) => {
                    warn!(job = %job.id, range = %range, error = %e, "Batch failed, skipping");
                    job.skip(range);
                    let attempts = match &e {
                        CoreError::ProvidersExhausted(report) => report.total_attempts,
                        _ => 0,
                    };
                    batches.push(BatchSummary {
                        range,
                        provider: None,
                        mode: None,
                        scenes: 0,
                        attempts,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        job.renumber();

        info!(
            job = %job.id,
            scenes = job.scenes.len(),
            requested = job.total_units,
            degraded = job.degraded,
            cancelled,
            "Generation job finished"
        );

        Ok(JobResult {
            job_id: job.id,
            job_key: None,
            title: job.title,
            scenes: job.scenes,
            requested_units: job.total_units,
            degraded: job.degraded,
            cancelled,
            skipped: job.skipped,
            batches,
            usage,
            charged: false,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
