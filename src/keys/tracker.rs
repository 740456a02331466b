//! Per-request key cycle tracking.
//!
//! A [`KeyCycleTracker`] lives for one attempt sequence within one request.
//! It owns a snapshot of the provider's parsed keys and walks them
//! round-robin, consulting the shared rotation state for cross-request
//! cooldowns. Keys the tracker has already attempted itself bypass those
//! cooldown gates on later cycles, so a single request can sweep all of a
//! provider's keys even when the shared maps show them failing; the
//! per-cycle set provides the dedup instead.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FailureAction;
use crate::keys::key_hint;
use crate::keys::state::RotationStore;

/// Round-robin key selector for a single request attempt sequence.
pub struct KeyCycleTracker {
    store: Arc<RotationStore>,
    provider: String,
    model: Option<String>,
    route_key: Option<String>,
    max_cycles: u32,
    provider_cooldown: Duration,
    route_cooldown: Duration,
    /// Snapshot of the parsed key list, taken at construction.
    keys: Vec<String>,
    /// Cursor into `keys`; seeded from the shared `last_used_index`.
    key_index: Option<usize>,
    current_cycle: u32,
    tried_this_cycle: HashSet<String>,
    /// Every key this tracker has returned, across cycles.
    attempted_ever: HashSet<String>,
}

impl KeyCycleTracker {
    /// Create a tracker for `provider`, snapshotting its parsed keys and
    /// rotation position. Cycle and cooldown limits default from the
    /// store's [`RotationSettings`](crate::config::RotationSettings).
    pub fn new(store: Arc<RotationStore>, provider: impl Into<String>) -> Self {
        let provider = provider.into();
        let keys = store.available_keys(&provider);
        let key_index = store.with_state(&provider, |state, _| state.last_used_index);
        let settings = store.settings();

        Self {
            store,
            provider,
            model: None,
            route_key: None,
            max_cycles: settings.max_retry_cycles,
            provider_cooldown: settings.default_cooldown(),
            route_cooldown: settings.default_cooldown(),
            keys,
            key_index,
            current_cycle: 0,
            tried_this_cycle: HashSet::new(),
            attempted_ever: HashSet::new(),
        }
    }

    /// Scope the tracker to a provider-side model; model-level failures are
    /// recorded and consulted under `"{provider}/{model}"`.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.route_key = Some(format!("{}/{}", self.provider, model));
        self.model = Some(model);
        self
    }

    /// Override the per-request cycle bound.
    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Cooldown recorded for provider-wide key failures.
    pub fn with_provider_cooldown(mut self, cooldown: Duration) -> Self {
        self.provider_cooldown = cooldown;
        self
    }

    /// Cooldown recorded for model-scoped key failures.
    pub fn with_route_cooldown(mut self, cooldown: Duration) -> Self {
        self.route_cooldown = cooldown;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn route_cooldown(&self) -> Duration {
        self.route_cooldown
    }

    pub fn provider_cooldown(&self) -> Duration {
        self.provider_cooldown
    }

    /// Number of keys in the snapshot.
    pub fn total_keys(&self) -> usize {
        self.keys.len()
    }

    /// Cycles this tracker may still start.
    pub fn cycles_remaining(&self) -> u32 {
        self.max_cycles.saturating_sub(self.current_cycle)
    }

    /// Next key to try, or `None` when the tracker is exhausted.
    ///
    /// Advances the shared `last_used_index` for the accepted key. When the
    /// current cycle has swept every key without an acceptance, a new cycle
    /// begins (up to the cycle bound) with the per-cycle set cleared.
    pub fn get_next_key(&mut self) -> Option<String> {
        loop {
            if self.keys.is_empty() {
                return None;
            }
            if self.current_cycle >= self.max_cycles {
                return None;
            }
            if self.store.provider_in_cooldown(&self.provider) {
                tracing::debug!(provider = %self.provider, "Provider in cooldown, no key served");
                return None;
            }

            if let Some(key) = self.probe() {
                tracing::debug!(
                    provider = %self.provider,
                    key = %key_hint(&key),
                    cycle = self.current_cycle,
                    "Serving API key"
                );
                return Some(key);
            }

            if self.cycle_swept() {
                self.current_cycle += 1;
                self.tried_this_cycle.clear();
                tracing::debug!(
                    provider = %self.provider,
                    cycle = self.current_cycle,
                    max_cycles = self.max_cycles,
                    "Key cycle reset"
                );
                continue;
            }

            return None;
        }
    }

    /// One sweep over the snapshot from the current cursor position.
    fn probe(&mut self) -> Option<String> {
        let settings = self.store.settings();
        let num_keys = self.keys.len();
        let keys = &self.keys;
        let key_index = &mut self.key_index;
        let tried = &mut self.tried_this_cycle;
        let attempted = &mut self.attempted_ever;
        let route_key = self.route_key.as_deref();

        self.store.with_state(&self.provider, |state, now| {
            for _ in 0..num_keys {
                let idx = match *key_index {
                    Some(i) => (i + 1) % num_keys,
                    None => 0,
                };
                *key_index = Some(idx);
                let candidate = &keys[idx];

                if tried.contains(candidate) {
                    continue;
                }

                // Cross-request cooldown gates apply only to keys this
                // tracker has not attempted itself.
                if !attempted.contains(candidate) {
                    if let Some(entry) = state.failed_keys.get(candidate) {
                        if !entry.expired(now, &settings) {
                            continue;
                        }
                        state.failed_keys.remove(candidate);
                    }
                    if let Some(route) = route_key
                        && let Some(entries) = state.model_failed_keys.get_mut(route)
                    {
                        if let Some(entry) = entries.get(candidate) {
                            if !entry.expired(now, &settings) {
                                continue;
                            }
                            entries.remove(candidate);
                        }
                        if entries.is_empty() {
                            state.model_failed_keys.remove(route);
                        }
                    }
                }

                tried.insert(candidate.clone());
                attempted.insert(candidate.clone());
                state.last_used_index = Some(idx);
                return Some(candidate.clone());
            }
            None
        })
    }

    fn cycle_swept(&self) -> bool {
        self.tried_this_cycle.len() >= self.keys.len()
    }

    /// Record a failed attempt for `key`, resolving `action` against the
    /// shared state. `cooldown` is the action-specific duration, when the
    /// error rule carries one.
    pub fn mark_failed(&self, key: &str, action: FailureAction, cooldown: Option<Duration>) {
        match action {
            FailureAction::ModelKeyFailure => {
                let duration = cooldown.unwrap_or(self.route_cooldown);
                self.store.mark_key_failed(
                    &self.provider,
                    key,
                    self.route_key.as_deref(),
                    Some(duration),
                );
            }
            FailureAction::GlobalKeyFailure => {
                let duration = cooldown.unwrap_or(self.provider_cooldown);
                self.store
                    .mark_key_failed(&self.provider, key, None, Some(duration));
            }
            FailureAction::ProviderCooldown => {
                let duration = cooldown.unwrap_or(self.provider_cooldown);
                self.store.mark_provider_failed(&self.provider, duration);
            }
            FailureAction::Retry | FailureAction::Skip => {}
            FailureAction::Unknown => {
                tracing::warn!(
                    provider = %self.provider,
                    "Unknown failure action, treating as model_key_failure"
                );
                let duration = cooldown.unwrap_or(self.route_cooldown);
                self.store.mark_key_failed(
                    &self.provider,
                    key,
                    self.route_key.as_deref(),
                    Some(duration),
                );
            }
        }
    }

    /// Whether every key in the snapshot is blocked by an unexpired failure
    /// entry, or the provider itself is in cooldown.
    ///
    /// The router uses this to skip a route without sending any request.
    /// Ignores the per-request sets; with time-based cooldown disabled and
    /// no provider-wide cooldown this is always `false`.
    pub fn all_keys_in_cooldown(&self) -> bool {
        let settings = self.store.settings();
        let keys = &self.keys;
        let route_key = self.route_key.as_deref();

        self.store.with_state(&self.provider, |state, now| {
            if state.provider_failed_until.is_some_and(|until| until > now) {
                return true;
            }
            if settings.cooldown_disabled() || keys.is_empty() {
                return false;
            }
            keys.iter().all(|key| {
                if state
                    .failed_keys
                    .get(key)
                    .is_some_and(|e| !e.expired(now, &settings))
                {
                    return true;
                }
                route_key.is_some_and(|route| {
                    state
                        .model_failed_keys
                        .get(route)
                        .and_then(|entries| entries.get(key))
                        .is_some_and(|e| !e.expired(now, &settings))
                })
            })
        })
    }

    /// True when no further key can ever be served by this tracker: no keys,
    /// cycle bound reached, or the current cycle is fully swept and one more
    /// would exceed the bound.
    pub fn exhausted(&self) -> bool {
        if self.keys.is_empty() {
            return true;
        }
        if self.current_cycle >= self.max_cycles {
            return true;
        }
        self.cycle_swept() && self.current_cycle + 1 >= self.max_cycles
    }
}
