//! Logical-model routing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One concrete (provider, provider-model) route in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub provider: String,
    /// Provider-side model name (e.g. `gpt-4o`, not the logical name).
    pub model: String,
    /// Per-route cooldown override; wins over provider and logical defaults.
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
}

impl RouteConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            cooldown_seconds: None,
        }
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = Some(seconds);
        self
    }

    /// Key under which per-(provider,model) failures are recorded.
    pub fn route_key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Routing table for one caller-visible logical model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRoutingConfig {
    pub logical_name: String,
    /// Fallback cooldown when neither the route nor the provider config
    /// carries an override.
    #[serde(default)]
    pub default_cooldown_seconds: u64,
    /// Primary routes, tried in order.
    #[serde(default)]
    pub model_routings: Vec<RouteConfig>,
    /// Routes appended after the primaries are exhausted.
    #[serde(default)]
    pub fallback_model_routings: Vec<RouteConfig>,
}

impl ModelRoutingConfig {
    /// The full route chain: primaries followed by fallbacks.
    pub fn routes(&self) -> impl Iterator<Item = &RouteConfig> {
        self.model_routings
            .iter()
            .chain(self.fallback_model_routings.iter())
    }

    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_seconds)
    }
}
