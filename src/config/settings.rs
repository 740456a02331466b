//! Environment-derived rotation settings.

use std::time::Duration;

use crate::error::ConfigError;

const KEY_COOLDOWN_SECONDS: &str = "KEY_COOLDOWN_SECONDS";
const MAX_KEY_RETRY_CYCLES: &str = "MAX_KEY_RETRY_CYCLES";

/// Process-level knobs for key rotation.
///
/// `key_cooldown_seconds` is the default floor applied when neither the
/// error rule nor the provider/route configuration carries a duration; a
/// value of zero or below disables time-based cooldown entirely (failure
/// entries are treated as immediately expired) without disabling
/// within-cycle deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSettings {
    pub key_cooldown_seconds: i64,
    /// Upper bound on full key sweeps a single tracker may perform.
    pub max_retry_cycles: u32,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            key_cooldown_seconds: 60,
            max_retry_cycles: 1,
        }
    }
}

impl RotationSettings {
    /// Read settings from the process environment, after loading `.env`.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            key_cooldown_seconds: parse_env(KEY_COOLDOWN_SECONDS, defaults.key_cooldown_seconds)?,
            max_retry_cycles: parse_env(MAX_KEY_RETRY_CYCLES, defaults.max_retry_cycles)?,
        })
    }

    /// True when time-based cooldown is disabled process-wide.
    pub fn cooldown_disabled(&self) -> bool {
        self.key_cooldown_seconds <= 0
    }

    /// The default cooldown used when configuration provides no duration.
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.key_cooldown_seconds.max(0) as u64)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{}", e),
        }),
        _ => Ok(default),
    }
}
