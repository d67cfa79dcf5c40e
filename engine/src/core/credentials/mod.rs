//! Credential Pool
//!
//! Holds the interchangeable API keys configured for each provider together
//! with an in-memory quarantine ledger.
//!
//! # Selection
//!
//! - Keys are drawn pseudo-randomly among the non-quarantined keys of a
//!   provider so that load spreads across accounts.
//! - Auth and rate-limit failures quarantine the key that produced them.
//!   Server-side and unclassified failures leave the key eligible.
//! - When every key of a provider is quarantined the provider's quarantine is
//!   cleared and a key is handed out anyway (fail-open). A full lockout is
//!   far more often a burst of 429s than a revoked key set.
//!
//! # Secrets
//!
//! Secret values never appear in `Debug` output or logs; use
//! [`redact`] for diagnostics.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::ai::FailureClass;
use crate::core::ProviderId;

/// Highest numbered fallback key probed per provider (`PREFIX_1` .. `PREFIX_20`)
pub const MAX_NUMBERED_KEYS: usize = 20;

// =============================================================================
// Credential
// =============================================================================

/// A single API key handed out by the pool
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    provider: ProviderId,
    index: usize,
    secret: String,
}

impl Credential {
    /// Provider owning this credential
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Position of the credential within its provider's key list
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw secret value, for building request headers only
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Redacted preview of the secret for logging
    pub fn redacted(&self) -> String {
        redact(&self.secret)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("index", &self.index)
            .field("secret", &self.redacted())
            .finish()
    }
}

/// Returns a redacted preview of a secret for logging
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 12 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

// =============================================================================
// Pool Status
// =============================================================================

/// Read-only snapshot of a provider's key pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// Number of configured keys
    pub total: usize,
    /// Number of keys currently quarantined
    pub quarantined: usize,
}

impl PoolStatus {
    /// Number of keys currently eligible for selection
    pub fn available(&self) -> usize {
        self.total.saturating_sub(self.quarantined)
    }
}

// =============================================================================
// Credential Pool
// =============================================================================

#[derive(Debug, Default)]
struct ProviderKeys {
    secrets: Vec<String>,
    quarantined: HashSet<usize>,
}

/// Shared, internally synchronized pool of API keys per provider
#[derive(Debug, Default)]
pub struct CredentialPool {
    providers: Mutex<HashMap<ProviderId, ProviderKeys>>,
}

impl CredentialPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from a credential source (read once)
    pub fn from_source(source: &dyn CredentialSource) -> Self {
        let pool = Self::new();
        for (provider, secrets) in source.load() {
            pool.insert_provider(&provider, secrets);
        }
        pool
    }

    /// Adds keys for a provider (builder form)
    pub fn with_credentials<I, S>(self, provider: &str, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_provider(provider, secrets.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the key list of a provider and clears its quarantine
    pub fn insert_provider(&self, provider: &str, secrets: Vec<String>) {
        let secrets = dedupe_secrets(secrets);
        info!(provider, keys = secrets.len(), "Registered provider credentials");
        self.lock().insert(
            provider.to_string(),
            ProviderKeys {
                secrets,
                quarantined: HashSet::new(),
            },
        );
    }

    /// Returns a non-quarantined credential for the provider.
    ///
    /// Returns `None` only when the provider has no configured keys.
    pub fn next_credential(&self, provider: &str) -> Option<Credential> {
        let mut guard = self.lock();
        let keys = guard.get_mut(provider)?;
        let total = keys.secrets.len();
        if total == 0 {
            return None;
        }

        if keys.quarantined.len() >= total {
            warn!(
                provider,
                total, "All credentials quarantined, resetting provider quarantine"
            );
            keys.quarantined.clear();
        }

        let eligible: Vec<usize> = (0..total)
            .filter(|i| !keys.quarantined.contains(i))
            .collect();
        let index = *eligible.choose(&mut rand::thread_rng())?;

        Some(Credential {
            provider: provider.to_string(),
            index,
            secret: keys.secrets[index].clone(),
        })
    }

    /// Records a failed attempt made with a credential.
    ///
    /// Returns true if the credential became quarantined by this report.
    pub fn report_failure(&self, credential: &Credential, class: FailureClass) -> bool {
        if !class.quarantines_credential() {
            debug!(
                provider = credential.provider(),
                index = credential.index(),
                ?class,
                "Transient failure, credential stays eligible"
            );
            return false;
        }

        let mut guard = self.lock();
        let Some(keys) = guard.get_mut(credential.provider()) else {
            return false;
        };
        if credential.index() >= keys.secrets.len() {
            return false;
        }

        let newly = keys.quarantined.insert(credential.index());
        if newly {
            warn!(
                provider = credential.provider(),
                key = %credential.redacted(),
                ?class,
                quarantined = keys.quarantined.len(),
                total = keys.secrets.len(),
                "Credential quarantined"
            );
        }
        newly
    }

    /// Clears the quarantine of a provider
    pub fn reset(&self, provider: &str) {
        if let Some(keys) = self.lock().get_mut(provider) {
            keys.quarantined.clear();
        }
    }

    /// Returns the key counts for a provider (zeroes if unknown)
    pub fn status(&self, provider: &str) -> PoolStatus {
        self.lock()
            .get(provider)
            .map(|keys| PoolStatus {
                total: keys.secrets.len(),
                quarantined: keys.quarantined.len(),
            })
            .unwrap_or_default()
    }

    /// Returns the key counts of every known provider, sorted by provider id
    pub fn statuses(&self) -> Vec<(ProviderId, PoolStatus)> {
        let guard = self.lock();
        let mut statuses: Vec<(ProviderId, PoolStatus)> = guard
            .iter()
            .map(|(provider, keys)| {
                (
                    provider.clone(),
                    PoolStatus {
                        total: keys.secrets.len(),
                        quarantined: keys.quarantined.len(),
                    },
                )
            })
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProviderId, ProviderKeys>> {
        // Quarantine sets stay consistent even if a holder panicked.
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn dedupe_secrets(secrets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    secrets
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

// =============================================================================
// Credential Sources
// =============================================================================

/// Supplies the configured keys per provider, read once at startup
pub trait CredentialSource {
    /// Returns provider id → key list
    fn load(&self) -> HashMap<ProviderId, Vec<String>>;
}

/// Fixed in-memory key lists
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialSource {
    keys: HashMap<ProviderId, Vec<String>>,
}

impl StaticCredentialSource {
    /// Creates an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds keys for a provider
    pub fn with_keys<I, S>(mut self, provider: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys
            .entry(provider.to_string())
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }
}

impl CredentialSource for StaticCredentialSource {
    fn load(&self) -> HashMap<ProviderId, Vec<String>> {
        self.keys.clone()
    }
}

/// Reads numbered keys from environment variables.
///
/// For prefix `OPENAI_API_KEY` the variables `OPENAI_API_KEY`,
/// `OPENAI_API_KEY_1` .. `OPENAI_API_KEY_20` are probed. Gaps are allowed.
#[derive(Clone, Debug, Default)]
pub struct EnvCredentialSource {
    prefixes: Vec<(ProviderId, String)>,
}

impl EnvCredentialSource {
    /// Creates a source with no providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the environment prefix for a provider
    pub fn with_provider(mut self, provider: &str, env_prefix: &str) -> Self {
        self.prefixes
            .push((provider.to_string(), env_prefix.to_string()));
        self
    }

    /// Loads keys using a custom variable lookup
    pub fn load_with<F>(&self, lookup: F) -> HashMap<ProviderId, Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut keys: HashMap<ProviderId, Vec<String>> = HashMap::new();

        for (provider, prefix) in &self.prefixes {
            let names = std::iter::once(prefix.clone())
                .chain((1..=MAX_NUMBERED_KEYS).map(|n| format!("{}_{}", prefix, n)));

            let found: Vec<String> = names.filter_map(|name| lookup(&name)).collect();
            let found = dedupe_secrets(found);

            debug!(provider = %provider, prefix = %prefix, keys = found.len(), "Loaded keys from environment");
            keys.entry(provider.clone()).or_default().extend(found);
        }

        keys
    }
}

impl CredentialSource for EnvCredentialSource {
    fn load(&self) -> HashMap<ProviderId, Vec<String>> {
        self.load_with(|name| std::env::var(name).ok())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool_with(n: usize) -> CredentialPool {
        CredentialPool::new().with_credentials("openai", (0..n).map(|i| format!("sk-test-key-{:04}", i)))
    }

    #[test]
    fn test_next_credential_returns_configured_key() {
        let pool = pool_with(2);
        let cred = pool.next_credential("openai").unwrap();
        assert_eq!(cred.provider(), "openai");
        assert!(cred.index() < 2);
        assert!(cred.secret().starts_with("sk-test-key-"));
    }

    #[test]
    fn test_unknown_or_empty_provider_returns_none() {
        let pool = CredentialPool::new().with_credentials("gemini", Vec::<String>::new());
        assert!(pool.next_credential("gemini").is_none());
        assert!(pool.next_credential("missing").is_none());
        assert_eq!(pool.status("missing"), PoolStatus::default());
    }

    #[test]
    fn test_quarantined_key_is_skipped() {
        let pool = pool_with(2);
        let first = pool.next_credential("openai").unwrap();
        assert!(pool.report_failure(&first, FailureClass::AuthOrKey));

        for _ in 0..20 {
            let next = pool.next_credential("openai").unwrap();
            assert_ne!(next.index(), first.index());
        }
    }

    #[test]
    fn test_transient_failures_do_not_quarantine() {
        let pool = pool_with(1);
        let cred = pool.next_credential("openai").unwrap();

        assert!(!pool.report_failure(&cred, FailureClass::ServerError));
        assert!(!pool.report_failure(&cred, FailureClass::Unknown));
        assert_eq!(pool.status("openai").quarantined, 0);
    }

    #[test]
    fn test_rate_limit_quarantines() {
        let pool = pool_with(3);
        let cred = pool.next_credential("openai").unwrap();
        assert!(pool.report_failure(&cred, FailureClass::RateLimit));
        assert_eq!(pool.status("openai").quarantined, 1);
        assert_eq!(pool.status("openai").available(), 2);
    }

    #[test]
    fn test_quarantine_is_idempotent() {
        let pool = pool_with(3);
        let cred = pool.next_credential("openai").unwrap();

        assert!(pool.report_failure(&cred, FailureClass::AuthOrKey));
        let once = pool.status("openai");
        assert!(!pool.report_failure(&cred, FailureClass::AuthOrKey));
        let twice = pool.status("openai");

        assert_eq!(once, twice);
        assert_eq!(twice.quarantined, 1);
    }

    #[test]
    fn test_fail_open_after_total_quarantine() {
        let pool = pool_with(3);
        for i in 0..3 {
            let cred = Credential {
                provider: "openai".to_string(),
                index: i,
                secret: format!("sk-test-key-{:04}", i),
            };
            pool.report_failure(&cred, FailureClass::AuthOrKey);
        }
        assert_eq!(pool.status("openai").quarantined, 3);

        let cred = pool.next_credential("openai");
        assert!(cred.is_some());
        assert_eq!(pool.status("openai").quarantined, 0);
    }

    #[test]
    fn test_duplicate_and_blank_secrets_are_dropped() {
        let pool = CredentialPool::new().with_credentials("groq", vec!["a-key", " a-key ", "", "b-key"]);
        assert_eq!(pool.status("groq").total, 2);
    }

    #[test]
    fn test_reset_clears_quarantine() {
        let pool = pool_with(2);
        let cred = pool.next_credential("openai").unwrap();
        pool.report_failure(&cred, FailureClass::RateLimit);
        pool.reset("openai");
        assert_eq!(pool.status("openai").quarantined, 0);
    }

    #[test]
    fn test_concurrent_reports_are_consistent() {
        let pool = Arc::new(pool_with(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let cred = Credential {
                        provider: "openai".to_string(),
                        index: i,
                        secret: format!("sk-test-key-{:04}", i),
                    };
                    for _ in 0..50 {
                        pool.report_failure(&cred, FailureClass::RateLimit);
                        let _ = pool.status("openai");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.status("openai").quarantined, 8);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let pool = CredentialPool::new().with_credentials("openai", vec!["sk-abcdefghijklmnop"]);
        let cred = pool.next_credential("openai").unwrap();
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("sk-abcdefghijklmnop"));
        assert!(debug.contains("sk-a...mnop"));
    }

    #[test]
    fn test_redact_short_values() {
        assert_eq!(redact("short"), "*****");
        assert_eq!(redact(""), "");
    }

    #[test]
    fn test_env_source_reads_numbered_keys() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-primary"),
            ("OPENAI_API_KEY_2", "sk-second"),
            ("OPENAI_API_KEY_3", "sk-primary"),
            ("GEMINI_API_KEY_1", "AIza-one"),
        ]
        .into_iter()
        .collect();

        let source = EnvCredentialSource::new()
            .with_provider("openai", "OPENAI_API_KEY")
            .with_provider("gemini", "GEMINI_API_KEY")
            .with_provider("anthropic", "ANTHROPIC_API_KEY");
        let keys = source.load_with(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(keys["openai"], vec!["sk-primary", "sk-second"]);
        assert_eq!(keys["gemini"], vec!["AIza-one"]);
        assert!(keys["anthropic"].is_empty());
    }

    #[test]
    fn test_pool_from_static_source() {
        let source = StaticCredentialSource::new()
            .with_keys("openai", vec!["k1", "k2"])
            .with_keys("gemini", vec!["g1"]);
        let pool = CredentialPool::from_source(&source);

        let statuses = pool.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].0, "gemini");
        assert_eq!(statuses[1].1.total, 2);
    }
}
