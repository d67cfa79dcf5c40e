//! AI Gateway Module
//!
//! Single entry point for provider calls. The gateway owns the provider
//! registry and the failover executor; every call draws a credential from the
//! shared pool and reports classified failures back to it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::catalog::{ProviderCatalog, ProviderTier};
use super::failover::{AttemptLog, AttemptOutcome, FailoverExecutor, FailureClass, RetryPolicy};
use super::provider::{AIProvider, CompletionRequest, CompletionResponse};
use super::providers::{create_provider, ProviderFamily};
use crate::core::credentials::CredentialPool;
use crate::core::{CoreError, CoreResult, ProviderId};

// =============================================================================
// AI Gateway Configuration
// =============================================================================

/// Request defaults applied by the gateway
#[derive(Clone, Debug)]
pub struct AIGatewayConfig {
    /// Maximum tokens when a request sets none
    pub max_tokens: u32,
    /// Temperature when a request sets none
    pub temperature: f32,
}

impl Default for AIGatewayConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.8,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Successful gateway call
#[derive(Debug)]
pub struct GatewayCompletion {
    /// Provider response
    pub response: CompletionResponse,
    /// Provider that answered
    pub provider: ProviderId,
    /// Every attempt made for this call
    pub attempts: AttemptLog,
}

/// Per-provider health snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub family: ProviderFamily,
    pub tier: ProviderTier,
    pub model: String,
    /// Configured keys
    pub total: usize,
    /// Keys currently quarantined
    pub quarantined: usize,
}

impl ProviderHealth {
    /// Keys that can be handed out right now
    pub fn available(&self) -> usize {
        self.total.saturating_sub(self.quarantined)
    }
}

// =============================================================================
// AI Gateway
// =============================================================================

/// Multi-provider gateway with credential rotation and failover
pub struct AIGateway {
    catalog: Arc<ProviderCatalog>,
    pool: Arc<CredentialPool>,
    providers: HashMap<ProviderId, Arc<dyn AIProvider>>,
    executor: FailoverExecutor,
    config: AIGatewayConfig,
}

impl AIGateway {
    /// Creates a gateway, building one provider per catalog entry
    pub fn new(
        catalog: ProviderCatalog,
        pool: Arc<CredentialPool>,
        policy: RetryPolicy,
        config: AIGatewayConfig,
    ) -> CoreResult<Self> {
        let providers = catalog
            .iter()
            .map(create_provider)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self::with_providers(catalog, pool, policy, config, providers))
    }

    /// Creates a gateway from ready-made providers, keyed by `name()`
    pub fn with_providers(
        catalog: ProviderCatalog,
        pool: Arc<CredentialPool>,
        policy: RetryPolicy,
        config: AIGatewayConfig,
        providers: Vec<Arc<dyn AIProvider>>,
    ) -> Self {
        let providers: HashMap<ProviderId, Arc<dyn AIProvider>> = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();

        for descriptor in catalog.iter() {
            if !providers.contains_key(&descriptor.id) {
                warn!(provider = %descriptor.id, "Catalog entry has no provider implementation");
            }
        }

        let catalog = Arc::new(catalog);
        let executor = FailoverExecutor::new(Arc::clone(&catalog), Arc::clone(&pool), policy);

        Self {
            catalog,
            pool,
            providers,
            executor,
            config,
        }
    }

    /// Returns the catalog
    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Returns the shared credential pool
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Returns the request defaults
    pub fn config(&self) -> &AIGatewayConfig {
        &self.config
    }

    /// Completes a request on the first provider/key that succeeds.
    ///
    /// Only total exhaustion ([`CoreError::ProvidersExhausted`]) and
    /// cancellation are returned as errors.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        preferred: Option<&str>,
        cancel: &CancellationToken,
    ) -> CoreResult<GatewayCompletion> {
        let request = self.apply_defaults(request);

        let success = self
            .executor
            .run(preferred, cancel, |descriptor| {
                let provider = self.providers.get(&descriptor.id).cloned();
                let pool = Arc::clone(&self.pool);
                let request = request.clone();

                async move {
                    let Some(provider) = provider else {
                        return AttemptOutcome::anonymous(Err(CoreError::ProviderNotFound(
                            descriptor.id,
                        )));
                    };
                    let Some(credential) = pool.next_credential(&descriptor.id) else {
                        return AttemptOutcome::anonymous(Err(CoreError::NoCredentials(
                            descriptor.id,
                        )));
                    };

                    debug!(
                        provider = %descriptor.id,
                        key = %credential.redacted(),
                        "Calling provider"
                    );

                    let result = provider
                        .complete(&credential, request)
                        .await
                        .and_then(|response| {
                            if response.text.trim().is_empty() {
                                Err(CoreError::ProviderRequestFailed {
                                    provider: descriptor.id.clone(),
                                    status: None,
                                    message: "empty response body".to_string(),
                                })
                            } else {
                                Ok(response)
                            }
                        });

                    if let Err(error) = &result {
                        pool.report_failure(&credential, FailureClass::classify(error));
                    }
                    AttemptOutcome::with_credential(credential.index(), result)
                }
            })
            .await?;

        Ok(GatewayCompletion {
            response: success.value,
            provider: success.provider,
            attempts: success.attempts,
        })
    }

    /// Key counts per provider, in walk order
    pub fn health(&self) -> Vec<ProviderHealth> {
        self.catalog
            .ordered(None)
            .into_iter()
            .map(|descriptor| {
                let status = self.pool.status(&descriptor.id);
                ProviderHealth {
                    provider: descriptor.id.clone(),
                    family: descriptor.family,
                    tier: descriptor.tier,
                    model: descriptor.model.clone(),
                    total: status.total,
                    quarantined: status.quarantined,
                }
            })
            .collect()
    }

    /// Runs each provider's cheap connectivity check with one pooled key.
    ///
    /// Providers without keys report [`CoreError::NoCredentials`].
    pub async fn probe(&self) -> Vec<(ProviderId, CoreResult<()>)> {
        let mut results = Vec::with_capacity(self.catalog.len());
        for descriptor in self.catalog.ordered(None) {
            let result = match (
                self.providers.get(&descriptor.id),
                self.pool.next_credential(&descriptor.id),
            ) {
                (None, _) => Err(CoreError::ProviderNotFound(descriptor.id.clone())),
                (Some(_), None) => Err(CoreError::NoCredentials(descriptor.id.clone())),
                (Some(provider), Some(credential)) => provider.health_check(&credential).await,
            };
            results.push((descriptor.id.clone(), result));
        }
        results
    }

    fn apply_defaults(&self, mut request: CompletionRequest) -> CompletionRequest {
        if request.max_tokens.is_none() {
            request.max_tokens = Some(self.config.max_tokens);
        }
        if request.temperature.is_none() {
            request.temperature = Some(self.config.temperature);
        }
        request
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::catalog::ProviderDescriptor;
    use crate::core::ai::provider::{MockAIProvider, MockReply};

    fn gateway(
        providers: Vec<(MockAIProvider, ProviderTier, usize)>,
    ) -> (AIGateway, Vec<Arc<MockAIProvider>>) {
        let mut descriptors = Vec::new();
        let pool = CredentialPool::new();
        let mut mocks = Vec::new();

        for (mock, tier, keys) in providers {
            let id = mock.name().to_string();
            descriptors.push(ProviderDescriptor::new(
                &id,
                ProviderFamily::OpenAICompatible,
                tier,
                "mock-model",
            ));
            pool.insert_provider(
                &id,
                (0..keys).map(|i| format!("sk-{}-key-{:04}", id, i)).collect(),
            );
            mocks.push(Arc::new(mock));
        }

        let dyn_providers: Vec<Arc<dyn AIProvider>> = mocks
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn AIProvider>)
            .collect();

        let gateway = AIGateway::with_providers(
            ProviderCatalog::new(descriptors),
            Arc::new(pool),
            RetryPolicy::immediate(),
            AIGatewayConfig::default(),
            dyn_providers,
        );
        (gateway, mocks)
    }

    #[tokio::test]
    async fn test_complete_applies_defaults_and_returns_provider() {
        let (gateway, mocks) = gateway(vec![(
            MockAIProvider::new("primary").with_responder(|req| {
                format!("{:?}/{:?}", req.max_tokens, req.temperature)
            }),
            ProviderTier::Stable,
            1,
        )]);

        let result = gateway
            .complete(CompletionRequest::new("hi"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.provider, "primary");
        assert_eq!(result.response.text, "Some(8192)/Some(0.8)");
        assert_eq!(result.attempts.calls(), 1);
        assert_eq!(mocks[0].call_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_failures_quarantine_keys() {
        let (gateway, mocks) = gateway(vec![(
            MockAIProvider::new("primary").with_script(vec![
                MockReply::Status(401, "invalid api key".to_string()),
                MockReply::Status(403, "forbidden".to_string()),
            ]),
            ProviderTier::Stable,
            3,
        )]);

        let result = gateway
            .complete(CompletionRequest::new("hi"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(mocks[0].call_count(), 3);
        assert_eq!(result.attempts.failures(), 2);

        let health = gateway.health();
        assert_eq!(health[0].total, 3);
        assert_eq!(health[0].quarantined, 2);
        assert_eq!(health[0].available(), 1);

        // Quarantined keys are never reused while an eligible one remains
        let seen = mocks[0].credentials_seen();
        assert_ne!(seen[0], seen[1]);
        assert_ne!(seen[1], seen[2]);
        assert_ne!(seen[0], seen[2]);
    }

    #[tokio::test]
    async fn test_server_errors_do_not_quarantine() {
        let (gateway, _mocks) = gateway(vec![(
            MockAIProvider::new("primary").with_script(vec![
                MockReply::Status(503, "overloaded".to_string()),
                MockReply::Unreachable("connection reset".to_string()),
            ]),
            ProviderTier::Stable,
            3,
        )]);

        gateway
            .complete(CompletionRequest::new("hi"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gateway.health()[0].quarantined, 0);
    }

    #[tokio::test]
    async fn test_empty_response_counts_as_failure() {
        let (gateway, mocks) = gateway(vec![
            (
                MockAIProvider::new("primary").with_response("   "),
                ProviderTier::HighPerformance,
                1,
            ),
            (
                MockAIProvider::new("backup").with_response("{}"),
                ProviderTier::Fallback,
                1,
            ),
        ]);

        let result = gateway
            .complete(CompletionRequest::new("hi"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.provider, "backup");
        assert_eq!(mocks[0].call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_report() {
        let (gateway, _mocks) = gateway(vec![(
            MockAIProvider::new("primary").with_script(vec![
                MockReply::Status(401, "bad key".to_string()),
                MockReply::Status(401, "bad key".to_string()),
            ]),
            ProviderTier::Stable,
            2,
        )]);

        let err = gateway
            .complete(CompletionRequest::new("hi"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CoreError::ProvidersExhausted(report) => {
                assert_eq!(report.total_attempts, 2);
                assert_eq!(report.providers_tried, vec!["primary".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_health_lists_providers_without_keys() {
        let (gateway, _mocks) = gateway(vec![
            (MockAIProvider::new("a"), ProviderTier::Fallback, 0),
            (MockAIProvider::new("b"), ProviderTier::HighPerformance, 2),
        ]);

        let health = gateway.health();
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].provider, "b");
        assert_eq!(health[1].total, 0);
    }

    #[tokio::test]
    async fn test_probe_reports_missing_keys() {
        let (gateway, _mocks) = gateway(vec![
            (MockAIProvider::new("a"), ProviderTier::Stable, 0),
            (MockAIProvider::new("b"), ProviderTier::Stable, 1),
        ]);

        let results = gateway.probe().await;
        assert!(matches!(results[0].1, Err(CoreError::NoCredentials(_))));
        assert!(results[1].1.is_ok());
    }
}
