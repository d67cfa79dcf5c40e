//! Settings Persistence
//!
//! Pipeline settings stored as camelCase JSON with:
//! - Defaults for every field
//! - Normalization of out-of-range values
//! - Atomic file writes (temp file + rename)
//!
//! Storage location: {config_dir}/settings.json

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::ai::{
    AIGatewayConfig, ProviderCatalog, ProviderDescriptor, ProviderFamily, ProviderTier,
    RetryPolicy,
};
use crate::core::credentials::EnvCredentialSource;
use crate::core::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Providers in catalog order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSettings>,

    #[serde(default)]
    pub failover: FailoverSettings,

    #[serde(default)]
    pub generation: GenerationSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            providers: default_providers(),
            failover: FailoverSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Clamps values into supported ranges and drops unusable providers
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.providers.retain_mut(|p| {
            p.id = p.id.trim().to_string();
            p.model = p.model.trim().to_string();
            if p.id.is_empty() || p.model.is_empty() {
                warn!(provider = %p.id, "Dropping provider without id or model");
                return false;
            }
            if !seen.insert(p.id.clone()) {
                warn!(provider = %p.id, "Dropping duplicate provider");
                return false;
            }
            p.base_url = p
                .base_url
                .take()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty());
            p.key_env = p.key_env.trim().to_string();
            if p.key_env.is_empty() {
                p.key_env = default_key_env(&p.id);
            }
            p.timeout_secs = p.timeout_secs.clamp(5, 600);
            true
        });

        self.failover.normalize();
        self.generation.normalize();
    }

    /// Provider catalog in configured order
    pub fn catalog(&self) -> ProviderCatalog {
        ProviderCatalog::new(self.providers.iter().map(ProviderSettings::descriptor).collect())
    }

    /// Environment source reading each provider's numbered keys
    pub fn credential_source(&self) -> EnvCredentialSource {
        self.providers
            .iter()
            .fold(EnvCredentialSource::new(), |source, p| {
                source.with_provider(&p.id, &p.key_env)
            })
    }
}

// =============================================================================
// Providers
// =============================================================================

/// One configured provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub id: String,
    pub family: ProviderFamily,
    #[serde(default)]
    pub tier: ProviderTier,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the key; `_1`.. `_20` suffixes are read too
    #[serde(default)]
    pub key_env: String,
}

impl ProviderSettings {
    pub fn descriptor(&self) -> ProviderDescriptor {
        let descriptor = ProviderDescriptor::new(&self.id, self.family, self.tier, &self.model)
            .with_timeout(self.timeout_secs);
        match &self.base_url {
            Some(url) => descriptor.with_base_url(url),
            None => descriptor,
        }
    }
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_key_env(id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}_API_KEY", id)
}

fn default_providers() -> Vec<ProviderSettings> {
    let provider = |id: &str, family, tier, model: &str, base_url: Option<&str>| ProviderSettings {
        id: id.to_string(),
        family,
        tier,
        model: model.to_string(),
        base_url: base_url.map(str::to_string),
        timeout_secs: default_timeout_secs(),
        key_env: default_key_env(id),
    };

    vec![
        provider(
            "gemini",
            ProviderFamily::Gemini,
            ProviderTier::HighPerformance,
            "gemini-2.5-pro",
            None,
        ),
        provider(
            "openai",
            ProviderFamily::OpenAICompatible,
            ProviderTier::Stable,
            "gpt-4o-mini",
            None,
        ),
        provider(
            "anthropic",
            ProviderFamily::Anthropic,
            ProviderTier::Stable,
            "claude-3-5-haiku-latest",
            None,
        ),
        provider(
            "deepseek",
            ProviderFamily::OpenAICompatible,
            ProviderTier::Fallback,
            "deepseek-chat",
            Some("https://api.deepseek.com/v1"),
        ),
    ]
}

// =============================================================================
// Failover
// =============================================================================

/// Retry and backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailoverSettings {
    #[serde(default = "default_attempts")]
    pub attempts_per_provider: usize,
    #[serde(default = "default_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_auth_retry_ms")]
    pub auth_retry_delay_ms: u64,
    #[serde(default = "default_server_error_ms")]
    pub server_error_delay_ms: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            attempts_per_provider: default_attempts(),
            rate_limit_backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            auth_retry_delay_ms: default_auth_retry_ms(),
            server_error_delay_ms: default_server_error_ms(),
        }
    }
}

fn default_attempts() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    3_000
}

fn default_max_backoff_ms() -> u64 {
    12_000
}

fn default_auth_retry_ms() -> u64 {
    500
}

fn default_server_error_ms() -> u64 {
    2_000
}

impl FailoverSettings {
    pub fn normalize(&mut self) {
        self.attempts_per_provider = self.attempts_per_provider.clamp(1, 10);
        self.rate_limit_backoff_ms = self.rate_limit_backoff_ms.min(60_000);
        self.max_backoff_ms = self.max_backoff_ms.clamp(self.rate_limit_backoff_ms, 120_000);
        self.auth_retry_delay_ms = self.auth_retry_delay_ms.min(30_000);
        self.server_error_delay_ms = self.server_error_delay_ms.min(60_000);
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts_per_provider: self.attempts_per_provider,
            rate_limit_backoff: Duration::from_millis(self.rate_limit_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            auth_retry_delay: Duration::from_millis(self.auth_retry_delay_ms),
            server_error_delay: Duration::from_millis(self.server_error_delay_ms),
        }
    }
}

// =============================================================================
// Generation
// =============================================================================

/// Job-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Scenes per batch after the first
    #[serde(default = "default_units_per_batch")]
    pub units_per_batch: u32,
    /// Pause between batches
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Largest job accepted
    #[serde(default = "default_max_units")]
    pub max_units: u32,
    /// Credits charged per requested scene
    #[serde(default = "default_credit_per_unit")]
    pub credit_per_unit: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            units_per_batch: default_units_per_batch(),
            pacing_ms: default_pacing_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_units: default_max_units(),
            credit_per_unit: default_credit_per_unit(),
        }
    }
}

fn default_units_per_batch() -> u32 {
    5
}

fn default_pacing_ms() -> u64 {
    1_000
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_units() -> u32 {
    120
}

fn default_credit_per_unit() -> u64 {
    1
}

impl GenerationSettings {
    pub fn normalize(&mut self) {
        self.units_per_batch = self.units_per_batch.clamp(1, 50);
        self.pacing_ms = self.pacing_ms.min(60_000);
        self.max_tokens = self.max_tokens.clamp(256, 65_536);
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            default_temperature()
        };
        self.max_units = self.max_units.clamp(1, 1_000);
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn gateway_config(&self) -> AIGatewayConfig {
        AIGatewayConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Loads and saves [`PipelineSettings`]
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Manager for `settings.json` inside `config_dir`
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    /// Manager for an explicit settings file
    pub fn from_file(path: PathBuf) -> Self {
        Self {
            settings_path: path,
        }
    }

    /// Default location under the user config directory
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("scriptwright")))
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Loads settings, falling back to defaults when missing or unreadable
    pub fn load(&self) -> PipelineSettings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                PipelineSettings::default()
            }
        }
    }

    fn try_load(&self) -> CoreResult<PipelineSettings> {
        if !self.settings_path.exists() {
            info!("Settings file not found, using defaults");
            return Ok(PipelineSettings::default());
        }

        let content = fs::read_to_string(&self.settings_path)
            .map_err(|e| CoreError::SettingsError(format!("Failed to read settings file: {}", e)))?;
        let mut settings = serde_json::from_str::<PipelineSettings>(&content)
            .map_err(|e| CoreError::SettingsError(format!("Failed to parse settings file: {}", e)))?;

        if settings.version < SETTINGS_VERSION {
            info!(
                "Migrating settings from version {} to {}",
                settings.version, SETTINGS_VERSION
            );
            settings.version = SETTINGS_VERSION;
        }

        settings.normalize();
        Ok(settings)
    }

    /// Saves normalized settings using an atomic write (temp file + rename)
    pub fn save(&self, settings: &PipelineSettings) -> CoreResult<PipelineSettings> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::SettingsError(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let mut normalized = settings.clone();
        normalized.normalize();
        let content = serde_json::to_string_pretty(&normalized)?;

        let temp_path = self.settings_path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| {
            CoreError::SettingsError(format!("Failed to create temp settings file: {}", e))
        })?;
        file.write_all(content.as_bytes())
            .map_err(|e| CoreError::SettingsError(format!("Failed to write settings: {}", e)))?;
        file.sync_all()
            .map_err(|e| CoreError::SettingsError(format!("Failed to sync settings file: {}", e)))?;

        fs::rename(&temp_path, &self.settings_path).map_err(|e| {
            CoreError::SettingsError(format!("Failed to finalize settings file: {}", e))
        })?;

        info!("Settings saved to {:?}", self.settings_path);
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = PipelineSettings::default();

        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.providers.len(), 4);
        assert_eq!(settings.providers[1].key_env, "OPENAI_API_KEY");
        assert_eq!(settings.failover.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.generation.units_per_batch, 5);
        assert_eq!(settings.catalog().len(), 4);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: PipelineSettings =
            serde_json::from_str(r#"{"generation": {"unitsPerBatch": 8}}"#).unwrap();

        assert_eq!(settings.generation.units_per_batch, 8);
        assert_eq!(settings.generation.max_tokens, 8192);
        assert_eq!(settings.failover.attempts_per_provider, 3);
        assert_eq!(settings.providers, default_providers());
    }

    #[test]
    fn test_normalize_clamps_and_cleans() {
        let mut settings = PipelineSettings {
            providers: vec![
                ProviderSettings {
                    id: " groq ".to_string(),
                    family: ProviderFamily::OpenAICompatible,
                    tier: ProviderTier::Fallback,
                    model: "llama-3.3-70b-versatile".to_string(),
                    base_url: Some("  ".to_string()),
                    timeout_secs: 1,
                    key_env: String::new(),
                },
                ProviderSettings {
                    id: "groq".to_string(),
                    family: ProviderFamily::OpenAICompatible,
                    tier: ProviderTier::Stable,
                    model: "other".to_string(),
                    base_url: None,
                    timeout_secs: 90,
                    key_env: "X".to_string(),
                },
                ProviderSettings {
                    id: "broken".to_string(),
                    family: ProviderFamily::Gemini,
                    tier: ProviderTier::Stable,
                    model: " ".to_string(),
                    base_url: None,
                    timeout_secs: 90,
                    key_env: String::new(),
                },
            ],
            ..Default::default()
        };
        settings.failover.attempts_per_provider = 0;
        settings.generation.units_per_batch = 0;
        settings.generation.temperature = f32::NAN;

        settings.normalize();

        assert_eq!(settings.providers.len(), 1);
        let groq = &settings.providers[0];
        assert_eq!(groq.id, "groq");
        assert_eq!(groq.key_env, "GROQ_API_KEY");
        assert!(groq.base_url.is_none());
        assert_eq!(groq.timeout_secs, 5);
        assert_eq!(settings.failover.attempts_per_provider, 1);
        assert_eq!(settings.generation.units_per_batch, 1);
        assert_eq!(settings.generation.temperature, 0.8);
    }

    #[test]
    fn test_catalog_follows_tiers() {
        let settings = PipelineSettings::default();
        let catalog = settings.catalog();
        let order: Vec<&str> = catalog.ordered(None).iter().map(|d| d.id.as_str()).collect();

        assert_eq!(order, vec!["gemini", "openai", "anthropic", "deepseek"]);
        assert_eq!(
            catalog.get("deepseek").unwrap().base_url.as_deref(),
            Some("https://api.deepseek.com/v1")
        );
    }

    #[test]
    fn test_credential_source_uses_key_env() {
        let settings = PipelineSettings::default();
        let keys = settings.credential_source().load_with(|name| match name {
            "OPENAI_API_KEY" => Some("sk-main".to_string()),
            "OPENAI_API_KEY_1" => Some("sk-second".to_string()),
            _ => None,
        });

        assert_eq!(keys.get("openai").unwrap(), &vec!["sk-main".to_string(), "sk-second".to_string()]);
        assert!(keys.get("gemini").map_or(true, Vec::is_empty));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        assert_eq!(manager.load(), PipelineSettings::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().join("nested"));

        let mut settings = PipelineSettings::default();
        settings.generation.pacing_ms = 250;
        settings.generation.units_per_batch = 500;
        let saved = manager.save(&settings).unwrap();

        assert_eq!(saved.generation.units_per_batch, 50);
        assert!(manager.settings_path().exists());
        assert!(!manager.settings_path().with_extension("json.tmp").exists());
        assert_eq!(manager.load(), saved);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.json");
        fs::write(&path, "{ not json").unwrap();

        let manager = SettingsManager::from_file(path);
        assert_eq!(manager.load(), PipelineSettings::default());
    }
}
