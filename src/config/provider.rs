//! Provider configuration registry.
//!
//! Read-only, per-provider settings: environment variable patterns for API
//! keys, cooldown durations, per-model overrides, and the table mapping
//! upstream HTTP statuses to failure actions.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What the router should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Put the whole provider in a timed cooldown and move to the next route.
    ProviderCooldown,
    /// Blacklist the key provider-wide until its cooldown expires.
    GlobalKeyFailure,
    /// Blacklist the key for this (provider, model) pair only.
    ModelKeyFailure,
    /// Retry with the next key; no state recorded.
    Retry,
    /// Skip the key without recording anything.
    Skip,
    /// Unrecognized action string; resolved as `ModelKeyFailure` with a warning.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for FailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ProviderCooldown => "provider_cooldown",
            Self::GlobalKeyFailure => "global_key_failure",
            Self::ModelKeyFailure => "model_key_failure",
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// One entry in a provider's `error_handling` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRule {
    pub action: FailureAction,
    /// Action-specific cooldown; falls back to the tracker's route or
    /// provider cooldown when absent.
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
}

/// Provider-wide rate limiting settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
}

/// Where a provider's API keys come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeySettings {
    /// Ordered env-var patterns; each is either a literal name or a template
    /// containing `{INDEX}` (e.g. `OPENAI_API_KEY_{INDEX}`).
    #[serde(default)]
    pub env_var_patterns: Vec<String>,
}

/// Per (provider, model) settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
}

/// Settings for a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the provider's OpenAI-compatible API.
    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default)]
    pub rate_limiting: RateLimitSettings,

    #[serde(default)]
    pub api_keys: ApiKeySettings,

    #[serde(default)]
    pub models: HashMap<String, ModelSettings>,

    /// Status code (as a string, per the on-disk schema) to action mapping.
    #[serde(default)]
    pub error_handling: HashMap<String, ErrorRule>,
}

impl ProviderConfig {
    /// Provider-wide cooldown, if configured.
    pub fn provider_cooldown(&self) -> Option<Duration> {
        self.rate_limiting.cooldown_seconds.map(Duration::from_secs)
    }

    /// Cooldown override for a specific provider-side model, if configured.
    pub fn model_cooldown(&self, model: &str) -> Option<Duration> {
        self.models
            .get(model)
            .and_then(|m| m.cooldown_seconds)
            .map(Duration::from_secs)
    }

    /// Explicit error rule for an HTTP status, if one is mapped.
    pub fn error_rule(&self, status: u16) -> Option<&ErrorRule> {
        self.error_handling.get(&status.to_string())
    }
}

/// Read-only lookup of per-provider configuration.
///
/// Loaded once at startup; the routing core never mutates it.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Empty registry; every lookup falls back to defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an in-memory provider map.
    pub fn from_providers(providers: HashMap<String, ProviderConfig>) -> Self {
        Self { providers }
    }

    /// Load a registry from a YAML or JSON5 file keyed by provider name.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let display = path.display().to_string();

        let providers = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                    path: display,
                    message: e.to_string(),
                })?
            }
            Some("json") | Some("json5") => {
                json5::from_str(&contents).map_err(|e| ConfigError::ParseError {
                    path: display,
                    message: e.to_string(),
                })?
            }
            _ => return Err(ConfigError::UnsupportedFormat { path: display }),
        };

        Ok(Self { providers })
    }

    /// Settings for a provider, if configured.
    pub fn get(&self, provider: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider)
    }

    /// Env-var patterns for a provider's keys, if configured.
    pub fn env_var_patterns(&self, provider: &str) -> Option<&[String]> {
        self.get(provider)
            .map(|p| p.api_keys.env_var_patterns.as_slice())
            .filter(|patterns| !patterns.is_empty())
    }
}
