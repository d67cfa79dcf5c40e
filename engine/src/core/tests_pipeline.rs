//! End-to-end pipeline tests: service, orchestrator, gateway, failover,
//! credential pool, and decoder working together over mock providers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::ai::provider::MockReply;
use crate::core::ai::{
    AIGateway, AIGatewayConfig, AIProvider, MockAIProvider, ProviderCatalog, ProviderDescriptor,
    ProviderFamily, ProviderTier, RecoveryMode, RetryPolicy,
};
use crate::core::billing::InMemoryLedger;
use crate::core::credentials::CredentialPool;
use crate::core::jobs::{GenerateJobRequest, ScriptService};
use crate::core::settings::GenerationSettings;

fn scene_responder(req: &crate::core::ai::CompletionRequest) -> String {
    let narration = if req.prompt.contains("Previous scene") {
        "The story continues."
    } else {
        "The story opens."
    };
    format!(
        r#"{{"title":"Pipeline","scenes":[{{"scene_number":7,"narration":"{}","style_lock":"watercolor"}}]}}"#,
        narration
    )
}

fn build_service(
    providers: Vec<(Arc<MockAIProvider>, ProviderTier, usize)>,
    policy: RetryPolicy,
) -> ScriptService {
    let pool = CredentialPool::new();
    let mut descriptors = Vec::new();
    let mut dyn_providers: Vec<Arc<dyn AIProvider>> = Vec::new();

    for (mock, tier, keys) in providers {
        let id = mock.name().to_string();
        descriptors.push(ProviderDescriptor::new(
            &id,
            ProviderFamily::OpenAICompatible,
            tier,
            "mock-model",
        ));
        pool.insert_provider(&id, (0..keys).map(|i| format!("sk-{}-{:04}", id, i)).collect());
        dyn_providers.push(mock as Arc<dyn AIProvider>);
    }

    let gateway = AIGateway::with_providers(
        ProviderCatalog::new(descriptors),
        Arc::new(pool),
        policy,
        AIGatewayConfig::default(),
        dyn_providers,
    );
    let settings = GenerationSettings {
        units_per_batch: 1,
        ..Default::default()
    };
    ScriptService::new(Arc::new(gateway), Arc::new(InMemoryLedger::new(1_000)), settings)
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_keys_fail_over_within_provider() {
    let mock = Arc::new(
        MockAIProvider::new("primary")
            .with_script(vec![
                MockReply::Status(429, "rate limit exceeded".to_string()),
                MockReply::Status(429, "rate limit exceeded".to_string()),
            ])
            .with_responder(scene_responder),
    );
    let service = build_service(
        vec![(Arc::clone(&mock), ProviderTier::Stable, 3)],
        RetryPolicy::default(),
    );

    let mut request = GenerateJobRequest::new("a quiet harbor town", 3);
    request.scenes_per_batch = Some(1);
    let result = service.generate(request, &CancellationToken::new()).await.unwrap();

    let numbers: Vec<u32> = result.scenes.iter().map(|s| s.scene_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(!result.degraded);
    assert!(result.is_complete());

    // Two rate-limited calls, then one success per batch
    assert_eq!(mock.call_count(), 5);
    // Each rate-limited key is quarantined; the survivor serves every batch
    let seen = mock.credentials_seen();
    let mut first_three = seen[..3].to_vec();
    first_three.sort_unstable();
    assert_eq!(first_three, vec![0, 1, 2]);
    assert!(seen[2..].iter().all(|&i| i == seen[2]));
    assert_eq!(result.batches[0].attempts, 3);

    assert_eq!(result.scenes[0].narration, "The story opens.");
    assert_eq!(result.scenes[2].narration, "The story continues.");
    assert_eq!(result.scenes[2].style_lock.as_deref(), Some("watercolor"));
    assert!(result.charged);

    let health = service.health();
    assert_eq!(health[0].quarantined, 2);
}

#[tokio::test]
async fn test_auth_failures_move_to_next_tier() {
    let primary = Arc::new(MockAIProvider::new("primary").with_script(vec![
        MockReply::Status(401, "invalid api key".to_string()),
        MockReply::Status(401, "invalid api key".to_string()),
    ]));
    let backup = Arc::new(MockAIProvider::new("backup").with_responder(scene_responder));
    let service = build_service(
        vec![
            (Arc::clone(&primary), ProviderTier::HighPerformance, 2),
            (Arc::clone(&backup), ProviderTier::Fallback, 1),
        ],
        RetryPolicy::immediate(),
    );

    let result = service
        .generate(GenerateJobRequest::new("topic", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.scenes.len(), 1);
    assert_eq!(primary.call_count(), 2);
    assert_eq!(backup.call_count(), 1);
    assert_eq!(result.batches[0].provider.as_deref(), Some("backup"));
    assert_eq!(result.batches[0].attempts, 3);
}

#[tokio::test]
async fn test_exhausted_batch_degrades_job() {
    let mock = Arc::new(
        MockAIProvider::new("only")
            .with_script(vec![
                MockReply::Text(r#"{"scenes":[{"scene_number":1,"narration":"First."}]}"#.to_string()),
                MockReply::Unreachable("connection refused".to_string()),
                MockReply::Unreachable("connection refused".to_string()),
            ])
            .with_responder(|_| r#"{"scenes":[{"scene_number":3,"narration":"Third."}]}"#.to_string()),
    );
    let service = build_service(vec![(Arc::clone(&mock), ProviderTier::Stable, 2)], RetryPolicy::immediate());

    let mut request = GenerateJobRequest::new("topic", 3);
    request.scenes_per_batch = Some(1);
    let result = service.generate(request, &CancellationToken::new()).await.unwrap();

    assert!(result.degraded);
    assert_eq!(result.scenes.len(), 2);
    assert_eq!(result.scenes[1].narration, "Third.");
    assert_eq!(result.scenes[1].scene_number, 2);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.batches[1].attempts, 2);
    assert!(result.batches[1].error.is_some());
}

#[tokio::test]
async fn test_truncated_output_is_salvaged() {
    let mock = Arc::new(MockAIProvider::new("primary").with_script(vec![
        MockReply::Text("```json\n{\"scenes\":[{\"scene_number\":1,\"narration\":\"Opening.\"}]}\n```".to_string()),
        MockReply::Text(
            "{\"scenes\":[{\"scene_number\":2,\"narration\":\"Middle.\"},{\"scene_number\":3,\"narration\":\"Cut off"
                .to_string(),
        ),
    ]));
    let service = build_service(vec![(Arc::clone(&mock), ProviderTier::Stable, 1)], RetryPolicy::immediate());

    let mut request = GenerateJobRequest::new("topic", 3);
    request.scenes_per_batch = Some(2);
    let result = service.generate(request, &CancellationToken::new()).await.unwrap();

    assert!(result.scenes.len() >= 2);
    assert_eq!(result.scenes[0].recovery, RecoveryMode::Clean);
    assert_eq!(result.scenes[1].narration, "Middle.");
    assert!(result.scenes[1].recovery > RecoveryMode::Clean);
}
