//! Process-wide key rotation state.
//!
//! One [`ProviderRotation`] record per provider, created implicitly on first
//! access and mutated only under the store's lock. Rotation state is
//! in-memory only; nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::{ProviderRegistry, RotationSettings};
use crate::keys::{key_hint, parser};

/// A recorded key failure: when it happened and how long it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureEntry {
    pub failed_at: Instant,
    pub cooldown: Duration,
}

impl FailureEntry {
    /// Whether this entry no longer blocks the key. With time-based cooldown
    /// disabled, every entry counts as expired.
    pub(crate) fn expired(&self, now: Instant, settings: &RotationSettings) -> bool {
        if settings.cooldown_disabled() {
            return true;
        }
        now.saturating_duration_since(self.failed_at) >= self.cooldown
    }
}

/// Rotation state for a single provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRotation {
    /// Index into the parsed key list of the most recently served key.
    pub last_used_index: Option<usize>,
    /// Provider-wide key blacklist with per-entry expiry.
    pub failed_keys: HashMap<String, FailureEntry>,
    /// Per-`"{provider}/{model}"` key blacklists with per-entry expiry.
    pub model_failed_keys: HashMap<String, HashMap<String, FailureEntry>>,
    /// While set and in the future, the entire provider is in cooldown.
    pub provider_failed_until: Option<Instant>,
}

/// Where the store reads key material from.
#[derive(Debug, Clone)]
enum KeySource {
    ProcessEnv,
    /// Fixed snapshot, for hermetic tests.
    Snapshot(Vec<(String, String)>),
}

/// Shared, process-wide rotation state store.
///
/// A single mutex guards all provider records; every critical section is a
/// short read-modify-write and is never held across I/O. Callers share the
/// store via `Arc`.
pub struct RotationStore {
    registry: Arc<ProviderRegistry>,
    settings: RotationSettings,
    clock: Arc<dyn Clock>,
    env: KeySource,
    inner: Mutex<HashMap<String, ProviderRotation>>,
}

impl std::fmt::Debug for RotationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RotationStore {
    /// Create a store over the given provider registry and settings, using
    /// the real monotonic clock and the process environment.
    pub fn new(registry: Arc<ProviderRegistry>, settings: RotationSettings) -> Self {
        Self {
            registry,
            settings,
            clock: Arc::new(SystemClock),
            env: KeySource::ProcessEnv,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the clock. Tests use [`ManualClock`](crate::clock::ManualClock)
    /// to advance time deterministically.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read keys from a fixed variable snapshot instead of the process
    /// environment. Keeps tests hermetic and parallel-safe.
    pub fn with_env(mut self, vars: Vec<(String, String)>) -> Self {
        self.env = KeySource::Snapshot(vars);
        self
    }

    pub fn settings(&self) -> RotationSettings {
        self.settings
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// All parsed keys for a provider, including ones currently failed.
    pub fn available_keys(&self, provider: &str) -> Vec<String> {
        match &self.env {
            KeySource::ProcessEnv => parser::parse_provider_keys(&self.registry, provider),
            KeySource::Snapshot(vars) => {
                parser::parse_from_vars(&self.registry, provider, vars.iter().cloned())
            }
        }
    }

    /// Run `f` against a provider's rotation record under the store lock.
    ///
    /// The record is created on first access. `now` is read once, before the
    /// lock is taken.
    pub(crate) fn with_state<R>(
        &self,
        provider: &str,
        f: impl FnOnce(&mut ProviderRotation, Instant) -> R,
    ) -> R {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = inner.entry(provider.to_string()).or_default();
        f(state, now)
    }

    /// Select the next available key for a provider with round-robin order,
    /// without constructing a tracker.
    ///
    /// Skips keys with unexpired provider-wide failure entries and purges
    /// expired entries it observes. Returns `None` when no key is usable.
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let keys = self.available_keys(provider);
        if keys.is_empty() {
            return None;
        }

        let settings = self.settings;
        let selected = self.with_state(provider, |state, now| {
            let num_keys = keys.len();
            let last = state.last_used_index;
            for offset in 0..num_keys {
                let idx = match last {
                    Some(i) => (i + 1 + offset) % num_keys,
                    None => offset,
                };
                let candidate = &keys[idx];

                if let Some(entry) = state.failed_keys.get(candidate) {
                    if !entry.expired(now, &settings) {
                        continue;
                    }
                    state.failed_keys.remove(candidate);
                }

                state.last_used_index = Some(idx);
                return Some(candidate.clone());
            }
            None
        });

        if let Some(ref key) = selected {
            tracing::debug!(provider, key = %key_hint(key), "Selected API key");
        }
        selected
    }

    /// Record a key failure.
    ///
    /// With `route_key` set (`"{provider}/{model}"`), the failure is scoped
    /// to that provider-model pair; otherwise it is provider-wide. The
    /// cooldown falls back to the process default when not given.
    pub fn mark_key_failed(
        &self,
        provider: &str,
        key: &str,
        route_key: Option<&str>,
        cooldown: Option<Duration>,
    ) {
        let duration = cooldown.unwrap_or_else(|| self.settings.default_cooldown());
        self.with_state(provider, |state, now| {
            let entry = FailureEntry {
                failed_at: now,
                cooldown: duration,
            };
            match route_key {
                Some(route) => {
                    state
                        .model_failed_keys
                        .entry(route.to_string())
                        .or_default()
                        .insert(key.to_string(), entry);
                }
                None => {
                    state.failed_keys.insert(key.to_string(), entry);
                }
            }
        });
        tracing::warn!(
            provider,
            route = route_key.unwrap_or(provider),
            key = %key_hint(key),
            cooldown_secs = duration.as_secs(),
            "Marked API key as failed"
        );
    }

    /// Put the whole provider in cooldown for `cooldown`.
    pub fn mark_provider_failed(&self, provider: &str, cooldown: Duration) {
        self.with_state(provider, |state, now| {
            state.provider_failed_until = Some(now + cooldown);
        });
        tracing::warn!(
            provider,
            cooldown_secs = cooldown.as_secs(),
            "Provider placed in cooldown"
        );
    }

    /// Whether the provider is currently in provider-wide cooldown.
    pub fn provider_in_cooldown(&self, provider: &str) -> bool {
        self.with_state(provider, |state, now| {
            state.provider_failed_until.is_some_and(|until| until > now)
        })
    }

    /// Clear failure entries (key, model, and provider-wide) for one
    /// provider, or for all providers when `provider` is `None`. Leaves
    /// `last_used_index` untouched. Never fails.
    pub fn reset_failed(&self, provider: Option<&str>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match provider {
            Some(name) => {
                if let Some(state) = inner.get_mut(name) {
                    clear_failures(state);
                }
            }
            None => {
                for state in inner.values_mut() {
                    clear_failures(state);
                }
            }
        }
    }

    /// Drop rotation records entirely (failures and `last_used_index`) for
    /// one provider, or for all providers when `provider` is `None`.
    pub fn reset_all(&self, provider: Option<&str>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match provider {
            Some(name) => {
                inner.remove(name);
            }
            None => inner.clear(),
        }
    }

    /// Copy of a provider's rotation record, for debugging and tests.
    pub fn snapshot(&self, provider: &str) -> ProviderRotation {
        self.with_state(provider, |state, _| state.clone())
    }
}

fn clear_failures(state: &mut ProviderRotation) {
    state.failed_keys.clear();
    state.model_failed_keys.clear();
    state.provider_failed_until = None;
}
