//! Failover Executor
//!
//! Runs a unit of work against the provider catalog, retrying per failure
//! class and moving on to the next provider when a provider's attempt budget
//! is spent.
//!
//! The attempt budget per provider is `min(max_attempts_per_provider, keys)`,
//! so a full walk never issues more than `Σ min(3, K_i)` calls no matter how
//! many keys are configured.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::{ProviderCatalog, ProviderDescriptor};
use crate::core::credentials::CredentialPool;
use crate::core::{CoreError, CoreResult, ProviderId};

// =============================================================================
// Failure Classification
// =============================================================================

/// Retry-relevant class of a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    /// Key invalid, expired, or unauthorized
    AuthOrKey,
    /// Quota exceeded or too many requests
    RateLimit,
    /// Upstream 5xx or transport-level trouble
    ServerError,
    /// Anything else
    Unknown,
}

impl FailureClass {
    /// Maps an HTTP status to a failure class
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureClass::AuthOrKey,
            429 => FailureClass::RateLimit,
            408 | 500..=599 => FailureClass::ServerError,
            _ => FailureClass::Unknown,
        }
    }

    /// Classifies an error returned by a unit of work
    pub fn classify(error: &CoreError) -> Self {
        match error {
            CoreError::ProviderRequestFailed {
                status, message, ..
            } => match status.map(Self::from_status) {
                Some(FailureClass::Unknown) | None => Self::from_message(message),
                Some(class) => class,
            },
            CoreError::ProviderUnreachable { .. } | CoreError::Timeout(_) => {
                FailureClass::ServerError
            }
            CoreError::NoCredentials(_) => FailureClass::AuthOrKey,
            _ => FailureClass::Unknown,
        }
    }

    /// Best-effort classification from an error body.
    ///
    /// Some vendors report bad keys as 400 and quota exhaustion without 429.
    fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        const AUTH: &[&str] = &[
            "api key",
            "api_key",
            "invalid key",
            "unauthorized",
            "unauthenticated",
            "permission denied",
            "invalid x-api-key",
        ];
        const RATE: &[&str] = &[
            "rate limit",
            "rate_limit",
            "too many requests",
            "quota",
            "resource_exhausted",
        ];
        const SERVER: &[&str] = &[
            "overloaded",
            "unavailable",
            "internal error",
            "bad gateway",
            "timed out",
        ];

        if AUTH.iter().any(|p| lower.contains(p)) {
            FailureClass::AuthOrKey
        } else if RATE.iter().any(|p| lower.contains(p)) {
            FailureClass::RateLimit
        } else if SERVER.iter().any(|p| lower.contains(p)) {
            FailureClass::ServerError
        } else {
            FailureClass::Unknown
        }
    }

    /// Whether the credential that produced this failure should be quarantined
    pub fn quarantines_credential(self) -> bool {
        matches!(self, FailureClass::AuthOrKey | FailureClass::RateLimit)
    }

    /// Short label for logs and reports
    pub fn label(self) -> &'static str {
        match self {
            FailureClass::AuthOrKey => "auth",
            FailureClass::RateLimit => "rate limit",
            FailureClass::ServerError => "server",
            FailureClass::Unknown => "unknown",
        }
    }
}

// =============================================================================
// Attempt Log
// =============================================================================

/// One attempt made during a failover walk
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkAttempt {
    /// Provider tried
    pub provider: ProviderId,
    /// Key index used, when the work reported it
    pub credential_index: Option<usize>,
    /// Failure class; `None` for a success or a skipped provider
    pub failure: Option<FailureClass>,
    /// Error message or outcome note
    pub message: String,
    /// True for the placeholder recorded when a provider had no keys
    pub synthetic: bool,
    /// When the attempt finished
    pub at: DateTime<Utc>,
}

impl WorkAttempt {
    fn no_keys(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            credential_index: None,
            failure: None,
            message: "no keys configured".to_string(),
            synthetic: true,
            at: Utc::now(),
        }
    }

    fn success(provider: &str, credential_index: Option<usize>) -> Self {
        Self {
            provider: provider.to_string(),
            credential_index,
            failure: None,
            message: "ok".to_string(),
            synthetic: false,
            at: Utc::now(),
        }
    }

    fn failure(
        provider: &str,
        credential_index: Option<usize>,
        class: FailureClass,
        message: String,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            credential_index,
            failure: Some(class),
            message,
            synthetic: false,
            at: Utc::now(),
        }
    }

    /// Whether this entry records a real call to the provider
    pub fn is_call(&self) -> bool {
        !self.synthetic
    }
}

/// Ordered attempts of a single failover walk
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttemptLog(Vec<WorkAttempt>);

impl AttemptLog {
    fn push(&mut self, attempt: WorkAttempt) {
        self.0.push(attempt);
    }

    /// All entries, in order
    pub fn entries(&self) -> &[WorkAttempt] {
        &self.0
    }

    /// Number of real provider calls
    pub fn calls(&self) -> usize {
        self.0.iter().filter(|a| a.is_call()).count()
    }

    /// Number of failed provider calls
    pub fn failures(&self) -> usize {
        self.0.iter().filter(|a| a.failure.is_some()).count()
    }

    /// Consumes the log
    pub fn into_entries(self) -> Vec<WorkAttempt> {
        self.0
    }
}

// =============================================================================
// Failover Report
// =============================================================================

/// Failure counts per class
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCounts {
    pub auth_or_key: usize,
    pub rate_limit: usize,
    pub server_error: usize,
    pub unknown: usize,
}

impl FailureCounts {
    fn record(&mut self, class: FailureClass) {
        match class {
            FailureClass::AuthOrKey => self.auth_or_key += 1,
            FailureClass::RateLimit => self.rate_limit += 1,
            FailureClass::ServerError => self.server_error += 1,
            FailureClass::Unknown => self.unknown += 1,
        }
    }

    /// Total failures counted
    pub fn total(&self) -> usize {
        self.auth_or_key + self.rate_limit + self.server_error + self.unknown
    }

    /// Class with the highest count; ties resolve in declaration order
    pub fn dominant(&self) -> Option<FailureClass> {
        let candidates = [
            (FailureClass::AuthOrKey, self.auth_or_key),
            (FailureClass::RateLimit, self.rate_limit),
            (FailureClass::ServerError, self.server_error),
            (FailureClass::Unknown, self.unknown),
        ];
        candidates
            .iter()
            .filter(|(_, n)| *n > 0)
            .fold(None, |best: Option<(FailureClass, usize)>, &(class, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((class, n)),
            })
            .map(|(class, _)| class)
    }
}

/// Likely cause of a failed walk, for user-facing messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExhaustionDiagnosis {
    /// No provider had any key configured
    NoCredentials,
    /// Every call was rejected for auth reasons
    Configuration,
    /// Rate limiting dominated
    RateLimited,
    /// Upstream errors dominated
    ProviderOutage,
    /// No clear majority
    Mixed,
}

impl ExhaustionDiagnosis {
    /// Actionable message for the end user
    pub fn user_hint(self) -> &'static str {
        match self {
            ExhaustionDiagnosis::NoCredentials => {
                "No AI provider credentials are configured. Please contact the operator."
            }
            ExhaustionDiagnosis::Configuration => {
                "All AI providers rejected their credentials. Please contact the operator."
            }
            ExhaustionDiagnosis::RateLimited => {
                "All AI providers are rate-limited right now. Please try again later."
            }
            ExhaustionDiagnosis::ProviderOutage => {
                "AI providers are temporarily unavailable. Please try again shortly."
            }
            ExhaustionDiagnosis::Mixed => "Generation failed on every AI provider. Please try again.",
        }
    }

    /// Whether retrying later is likely to help
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ExhaustionDiagnosis::RateLimited
                | ExhaustionDiagnosis::ProviderOutage
                | ExhaustionDiagnosis::Mixed
        )
    }
}

/// Aggregated failure of a full failover walk
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverReport {
    /// Real provider calls made
    pub total_attempts: usize,
    /// Failures per class
    pub counts: FailureCounts,
    /// Providers walked, in order (including skipped ones)
    pub providers_tried: Vec<ProviderId>,
    /// Full attempt log
    pub attempts: Vec<WorkAttempt>,
}

impl FailoverReport {
    fn from_log(log: AttemptLog, providers_tried: Vec<ProviderId>) -> Self {
        let mut counts = FailureCounts::default();
        for class in log.entries().iter().filter_map(|a| a.failure) {
            counts.record(class);
        }
        Self {
            total_attempts: log.calls(),
            counts,
            providers_tried,
            attempts: log.into_entries(),
        }
    }

    /// Likely cause of the failure
    pub fn diagnosis(&self) -> ExhaustionDiagnosis {
        let total = self.counts.total();
        if self.total_attempts == 0 || total == 0 {
            return ExhaustionDiagnosis::NoCredentials;
        }
        if self.counts.auth_or_key == total {
            return ExhaustionDiagnosis::Configuration;
        }

        let transient = self.counts.rate_limit + self.counts.server_error;
        if transient * 2 > total {
            if self.counts.rate_limit >= self.counts.server_error {
                ExhaustionDiagnosis::RateLimited
            } else {
                ExhaustionDiagnosis::ProviderOutage
            }
        } else {
            ExhaustionDiagnosis::Mixed
        }
    }
}

impl std::fmt::Display for FailoverReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let diagnosis = match self.diagnosis() {
            ExhaustionDiagnosis::NoCredentials => "no credentials configured",
            ExhaustionDiagnosis::Configuration => "likely a configuration problem",
            ExhaustionDiagnosis::RateLimited => "likely transient (rate limited)",
            ExhaustionDiagnosis::ProviderOutage => "likely transient (provider errors)",
            ExhaustionDiagnosis::Mixed => "mixed failures",
        };
        write!(
            f,
            "All providers exhausted after {} attempts across [{}] (auth: {}, rate limit: {}, server: {}, unknown: {}); {}",
            self.total_attempts,
            self.providers_tried.join(", "),
            self.counts.auth_or_key,
            self.counts.rate_limit,
            self.counts.server_error,
            self.counts.unknown,
            diagnosis
        )
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Delays and budgets applied during a failover walk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt cap per provider (further capped by its key count)
    pub max_attempts_per_provider: usize,
    /// First rate-limit backoff; doubles on each further rate-limit retry
    pub rate_limit_backoff: Duration,
    /// Ceiling for the rate-limit backoff
    pub max_backoff: Duration,
    /// Delay before retrying after an auth failure
    pub auth_retry_delay: Duration,
    /// Delay before retrying after a server error
    pub server_error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_provider: 3,
            rate_limit_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(12),
            auth_retry_delay: Duration::from_millis(500),
            server_error_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy without delays (tests, local tooling)
    pub fn immediate() -> Self {
        Self {
            rate_limit_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            auth_retry_delay: Duration::ZERO,
            server_error_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1` after a failure of `class`
    pub fn delay_for(&self, class: FailureClass, attempt: usize) -> Duration {
        match class {
            FailureClass::RateLimit => {
                let factor = 1u32 << attempt.min(16) as u32;
                self.rate_limit_backoff
                    .saturating_mul(factor)
                    .min(self.max_backoff.max(self.rate_limit_backoff))
            }
            FailureClass::ServerError => self.server_error_delay,
            FailureClass::AuthOrKey | FailureClass::Unknown => self.auth_retry_delay,
        }
    }

    /// Attempt budget for a provider with `keys` credentials
    pub fn budget_for(&self, keys: usize) -> usize {
        self.max_attempts_per_provider.max(1).min(keys)
    }
}

// =============================================================================
// Failover Executor
// =============================================================================

/// What a unit of work reports back for one attempt
#[derive(Debug)]
pub struct AttemptOutcome<T> {
    /// Key index used, if the work drew one
    pub credential_index: Option<usize>,
    /// Result of the attempt
    pub result: CoreResult<T>,
}

impl<T> AttemptOutcome<T> {
    /// Outcome of an attempt made with a known key
    pub fn with_credential(index: usize, result: CoreResult<T>) -> Self {
        Self {
            credential_index: Some(index),
            result,
        }
    }

    /// Outcome of an attempt that did not report its key
    pub fn anonymous(result: CoreResult<T>) -> Self {
        Self {
            credential_index: None,
            result,
        }
    }
}

/// Successful result of a failover walk
#[derive(Debug)]
pub struct FailoverSuccess<T> {
    /// Value produced by the successful attempt
    pub value: T,
    /// Provider that produced it
    pub provider: ProviderId,
    /// Every attempt of the walk, the success included
    pub attempts: AttemptLog,
}

/// Walks providers and keys until a unit of work succeeds
#[derive(Clone)]
pub struct FailoverExecutor {
    catalog: Arc<ProviderCatalog>,
    pool: Arc<CredentialPool>,
    policy: RetryPolicy,
}

impl FailoverExecutor {
    /// Creates an executor over a catalog and a shared pool
    pub fn new(catalog: Arc<ProviderCatalog>, pool: Arc<CredentialPool>, policy: RetryPolicy) -> Self {
        Self {
            catalog,
            pool,
            policy,
        }
    }

    /// Returns the retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `work` until it succeeds or every provider is exhausted.
    ///
    /// `work` receives the provider to try and is expected to draw its own
    /// credential from the pool. Backoff delays abort with
    /// [`CoreError::Cancelled`] when `cancel` fires, and no new attempt starts
    /// after cancellation.
    pub async fn run<T, F, Fut>(
        &self,
        preferred: Option<&str>,
        cancel: &CancellationToken,
        mut work: F,
    ) -> CoreResult<FailoverSuccess<T>>
    where
        F: FnMut(ProviderDescriptor) -> Fut,
        Fut: Future<Output = AttemptOutcome<T>>,
    {
        let sequence = self.catalog.ordered(preferred);
        if sequence.is_empty() {
            return Err(CoreError::NoProvidersConfigured);
        }

        let mut log = AttemptLog::default();
        let mut tried = Vec::with_capacity(sequence.len());

        for descriptor in sequence {
            tried.push(descriptor.id.clone());

            let keys = self.pool.status(&descriptor.id).total;
            if keys == 0 {
                debug!(provider = %descriptor.id, "Skipping provider without keys");
                log.push(WorkAttempt::no_keys(&descriptor.id));
                continue;
            }

            let budget = self.policy.budget_for(keys);
            for attempt in 0..budget {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }

                let outcome = work(descriptor.clone()).await;
                match outcome.result {
                    Ok(value) => {
                        log.push(WorkAttempt::success(&descriptor.id, outcome.credential_index));
                        info!(
                            provider = %descriptor.id,
                            attempt = attempt + 1,
                            calls = log.calls(),
                            "Provider call succeeded"
                        );
                        return Ok(FailoverSuccess {
                            value,
                            provider: descriptor.id.clone(),
                            attempts: log,
                        });
                    }
                    Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                    Err(error) => {
                        let class = FailureClass::classify(&error);
                        warn!(
                            provider = %descriptor.id,
                            attempt = attempt + 1,
                            budget,
                            class = class.label(),
                            error = %error,
                            "Provider call failed"
                        );
                        log.push(WorkAttempt::failure(
                            &descriptor.id,
                            outcome.credential_index,
                            class,
                            error.to_string(),
                        ));

                        if attempt + 1 >= budget {
                            break;
                        }
                        let delay = self.policy.delay_for(class, attempt);
                        sleep_or_cancel(delay, cancel).await?;
                    }
                }
            }
        }

        let report = FailoverReport::from_log(log, tried);
        warn!(
            attempts = report.total_attempts,
            diagnosis = ?report.diagnosis(),
            "All providers exhausted"
        );
        Err(CoreError::ProvidersExhausted(report))
    }
}

/// Sleeps for `delay` unless `cancel` fires first
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> CoreResult<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================
