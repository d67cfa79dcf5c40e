//! Provider Catalog
//!
//! Static list of providers grouped by priority tier.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::providers::ProviderFamily;
use crate::core::ProviderId;

/// Priority tier; lower tiers are tried first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderTier {
    /// Strongest models, tried first
    HighPerformance,
    /// Reliable general-purpose models
    #[default]
    Stable,
    /// Last resort
    Fallback,
}

impl std::fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderTier::HighPerformance => write!(f, "high-performance"),
            ProviderTier::Stable => write!(f, "stable"),
            ProviderTier::Fallback => write!(f, "fallback"),
        }
    }
}

/// Immutable description of one provider endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    /// Unique provider id, also the credential pool key
    pub id: ProviderId,
    /// Wire protocol family
    pub family: ProviderFamily,
    /// Priority tier
    pub tier: ProviderTier,
    /// Model requested from the provider
    pub model: String,
    /// Custom base URL (OpenAI-compatible gateways, proxies)
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ProviderDescriptor {
    /// Creates a descriptor with the family's default endpoint
    pub fn new(id: &str, family: ProviderFamily, tier: ProviderTier, model: &str) -> Self {
        Self {
            id: id.to_string(),
            family,
            tier,
            model: model.to_string(),
            base_url: None,
            timeout_secs: 90,
        }
    }

    /// Sets the base URL
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    /// Sets the request timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Ordered set of providers
#[derive(Clone, Debug, Default)]
pub struct ProviderCatalog {
    providers: Vec<ProviderDescriptor>,
}

impl ProviderCatalog {
    /// Creates a catalog; later duplicates of an id are dropped
    pub fn new(providers: Vec<ProviderDescriptor>) -> Self {
        let mut unique: Vec<ProviderDescriptor> = Vec::with_capacity(providers.len());
        for provider in providers {
            if unique.iter().any(|p| p.id == provider.id) {
                warn!(provider = %provider.id, "Duplicate provider id in catalog, ignoring");
                continue;
            }
            unique.push(provider);
        }
        Self { providers: unique }
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Looks up a provider
    pub fn get(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Providers in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter()
    }

    /// Providers in walk order.
    ///
    /// Tiers run high-performance, stable, fallback; declaration order is kept
    /// within a tier. A preferred provider present in the catalog moves to the
    /// front. Unknown preferences are ignored.
    pub fn ordered(&self, preferred: Option<&str>) -> Vec<&ProviderDescriptor> {
        let mut ordered: Vec<&ProviderDescriptor> = self.providers.iter().collect();
        ordered.sort_by_key(|p| p.tier);

        if let Some(preferred) = preferred {
            if let Some(pos) = ordered.iter().position(|p| p.id == preferred) {
                let chosen = ordered.remove(pos);
                ordered.insert(0, chosen);
            } else {
                warn!(preferred, "Preferred provider not in catalog, using default order");
            }
        }

        ordered
    }
}
