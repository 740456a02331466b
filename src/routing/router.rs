//! Fallback routing across a logical model's route chain.
//!
//! One [`FallbackRouter`] serves one request: it walks the configured
//! routes in order, builds a [`KeyCycleTracker`] per route, and drives the
//! upstream until an attempt succeeds or the chain is exhausted. Upstream
//! failures are never re-raised mid-chain; they are resolved to failure
//! actions and consumed by the tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FailureAction, ModelRoutingConfig, RouteConfig};
use crate::error::{RouteAttempt, RouterError, UpstreamError};
use crate::keys::{KeyCycleTracker, RotationStore, key_hint};
use crate::routing::upstream::{Upstream, UpstreamRequest, UpstreamResponse};

/// An upstream failure translated to a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAction {
    pub action: FailureAction,
    /// Action-specific cooldown from the error rule, when configured.
    pub cooldown: Option<Duration>,
}

/// Walks a logical model's route chain, rotating keys within each route.
pub struct FallbackRouter {
    store: Arc<RotationStore>,
    upstream: Arc<dyn Upstream>,
    models: HashMap<String, ModelRoutingConfig>,
}

impl FallbackRouter {
    pub fn new(
        store: Arc<RotationStore>,
        upstream: Arc<dyn Upstream>,
        models: impl IntoIterator<Item = ModelRoutingConfig>,
    ) -> Self {
        let models = models
            .into_iter()
            .map(|m| (m.logical_name.clone(), m))
            .collect();
        Self {
            store,
            upstream,
            models,
        }
    }

    /// Execute a request against the route chain of `logical_model`.
    pub async fn execute(
        &self,
        logical_model: &str,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, RouterError> {
        let model_config = self
            .models
            .get(logical_model)
            .ok_or_else(|| RouterError::NoRoutes {
                logical_model: logical_model.to_string(),
            })?;
        self.execute_config(model_config, request).await
    }

    /// Execute a request against an explicit routing configuration.
    pub async fn execute_config(
        &self,
        model_config: &ModelRoutingConfig,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, RouterError> {
        if model_config.routes().next().is_none() {
            return Err(RouterError::NoRoutes {
                logical_model: model_config.logical_name.clone(),
            });
        }

        let mut attempts: Vec<RouteAttempt> = Vec::new();
        let mut final_status: Option<u16> = None;

        for route in model_config.routes() {
            let mut tracker = self.tracker_for_route(route, model_config);

            if tracker.all_keys_in_cooldown() {
                tracing::debug!(
                    provider = %route.provider,
                    model = %route.model,
                    "All keys in cooldown, skipping route"
                );
                continue;
            }

            let mut route_status: Option<u16> = None;
            let mut sent_any = false;

            'keys: while !tracker.exhausted() {
                let Some(key) = tracker.get_next_key() else {
                    break;
                };

                match self
                    .upstream
                    .invoke(&route.provider, &route.model, &key, request)
                    .await
                {
                    Ok(response) => {
                        tracing::info!(
                            logical_model = %model_config.logical_name,
                            provider = %route.provider,
                            model = %route.model,
                            "Request served"
                        );
                        return Ok(response);
                    }
                    Err(UpstreamError::Cancelled) => return Err(RouterError::Cancelled),
                    Err(error) => {
                        sent_any = true;
                        if let Some(status) = error.status() {
                            route_status = Some(status);
                            final_status = Some(status);
                        }

                        let resolved = self.resolve_error_action(&route.provider, &error);
                        tracing::warn!(
                            provider = %route.provider,
                            model = %route.model,
                            key = %key_hint(&key),
                            status = ?error.status(),
                            action = %resolved.action,
                            "Upstream attempt failed"
                        );
                        tracker.mark_failed(&key, resolved.action, resolved.cooldown);

                        // provider_cooldown blocks the route's remaining keys.
                        if resolved.action == FailureAction::ProviderCooldown {
                            break 'keys;
                        }
                    }
                }
            }

            if sent_any {
                attempts.push(RouteAttempt {
                    provider: route.provider.clone(),
                    model: route.model.clone(),
                    last_status: route_status,
                });
            }
        }

        Err(RouterError::Exhausted {
            logical_model: model_config.logical_name.clone(),
            attempts,
            final_status,
        })
    }

    /// Build the tracker for one route.
    ///
    /// The route cooldown resolves with strict priority: route override,
    /// then the provider's per-model override, then the logical model's
    /// default. The provider cooldown comes from the provider's rate
    /// limiting settings, falling back to the process default.
    pub fn tracker_for_route(
        &self,
        route: &RouteConfig,
        model_config: &ModelRoutingConfig,
    ) -> KeyCycleTracker {
        let provider_cfg = self.store.registry().get(&route.provider);
        let settings = self.store.settings();

        let provider_cooldown = provider_cfg
            .and_then(|c| c.provider_cooldown())
            .unwrap_or_else(|| settings.default_cooldown());

        let route_cooldown = route
            .cooldown_seconds
            .map(Duration::from_secs)
            .or_else(|| provider_cfg.and_then(|c| c.model_cooldown(&route.model)))
            .unwrap_or_else(|| model_config.default_cooldown());

        KeyCycleTracker::new(self.store.clone(), route.provider.clone())
            .with_model(route.model.clone())
            .with_provider_cooldown(provider_cooldown)
            .with_route_cooldown(route_cooldown)
    }

    /// Translate an upstream failure into a failure action.
    ///
    /// An explicit `error_handling` mapping for the status wins verbatim.
    /// Otherwise authentication failures (401, 403) blacklist the key
    /// provider-wide and everything else demotes to a per-route failure, so
    /// a misconfigured table degrades into per-key retry rather than
    /// silently blacklisting a provider.
    pub fn resolve_error_action(&self, provider: &str, error: &UpstreamError) -> ResolvedAction {
        let status = error.status();

        if let Some(status) = status
            && let Some(rule) = self
                .store
                .registry()
                .get(provider)
                .and_then(|c| c.error_rule(status))
        {
            return ResolvedAction {
                action: rule.action,
                cooldown: rule.cooldown_seconds.map(Duration::from_secs),
            };
        }

        let action = match status {
            Some(401) | Some(403) => FailureAction::GlobalKeyFailure,
            _ => FailureAction::ModelKeyFailure,
        };
        ResolvedAction {
            action,
            cooldown: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::clock::ManualClock;
    use crate::config::{
        ErrorRule, ModelSettings, ProviderConfig, ProviderRegistry, RateLimitSettings,
        RotationSettings,
    };

    /// Upstream that replays a scripted sequence of outcomes and records
    /// every (provider, model, key) it was invoked with.
    struct ScriptedUpstream {
        script: Mutex<VecDeque<Result<UpstreamResponse, UpstreamError>>>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl ScriptedUpstream {
        fn new(script: Vec<Result<UpstreamResponse, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn ok() -> Result<UpstreamResponse, UpstreamError> {
        Ok(UpstreamResponse {
            status: 200,
            body: json!({"choices": []}),
        })
    }

    fn err(provider: &str, status: u16) -> Result<UpstreamResponse, UpstreamError> {
        Err(UpstreamError::Status {
            provider: provider.to_string(),
            status,
            message: "scripted failure".to_string(),
        })
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn invoke(
            &self,
            provider: &str,
            model: &str,
            api_key: &str,
            _request: &UpstreamRequest,
        ) -> Result<UpstreamResponse, UpstreamError> {
            self.calls.lock().unwrap().push((
                provider.to_string(),
                model.to_string(),
                api_key.to_string(),
            ));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| err(provider, 500))
        }
    }

    fn store_with(
        registry: ProviderRegistry,
        entries: &[(&str, &str)],
    ) -> (Arc<RotationStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let vars = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let store = RotationStore::new(Arc::new(registry), RotationSettings::default())
            .with_clock(clock.clone())
            .with_env(vars);
        (Arc::new(store), clock)
    }

    fn routing(logical: &str, routes: Vec<RouteConfig>) -> ModelRoutingConfig {
        ModelRoutingConfig {
            logical_name: logical.to_string(),
            default_cooldown_seconds: 300,
            model_routings: routes,
            fallback_model_routings: Vec::new(),
        }
    }

    fn request() -> UpstreamRequest {
        UpstreamRequest::new(json!({"messages": [{"role": "user", "content": "hi"}]}))
    }

    #[tokio::test]
    async fn test_success_on_first_route() {
        let (store, _) = store_with(ProviderRegistry::new(), &[("OPENAI_API_KEY", "A")]);
        let upstream = ScriptedUpstream::new(vec![ok()]);
        let router = FallbackRouter::new(
            store,
            upstream.clone(),
            vec![routing("gpt-4", vec![RouteConfig::new("openai", "gpt-4o")])],
        );

        let response = router.execute("gpt-4", &request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_logical_model() {
        let (store, _) = store_with(ProviderRegistry::new(), &[]);
        let upstream = ScriptedUpstream::new(vec![]);
        let router = FallbackRouter::new(store, upstream, Vec::<ModelRoutingConfig>::new());

        let err = router.execute("missing", &request()).await.unwrap_err();
        assert!(matches!(err, RouterError::NoRoutes { .. }));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_key_then_next_route() {
        let (store, _) = store_with(
            ProviderRegistry::new(),
            &[
                ("OPENAI_API_KEY_1", "A"),
                ("OPENAI_API_KEY_2", "B"),
                ("OPENROUTER_API_KEY", "C"),
            ],
        );
        let upstream = ScriptedUpstream::new(vec![
            err("openai", 429),
            err("openai", 429),
            ok(),
        ]);
        let router = FallbackRouter::new(
            store,
            upstream.clone(),
            vec![routing(
                "gpt-4",
                vec![
                    RouteConfig::new("openai", "gpt-4o"),
                    RouteConfig::new("openrouter", "openai/gpt-4o"),
                ],
            )],
        );

        let response = router.execute("gpt-4", &request()).await.unwrap();
        assert_eq!(response.status, 200);

        let calls = upstream.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, "openai");
        assert_eq!(calls[1].0, "openai");
        assert_ne!(calls[0].2, calls[1].2);
        assert_eq!(calls[2].0, "openrouter");
    }

    #[tokio::test]
    async fn test_exhaustion_lists_attempts_in_order() {
        let (store, _) = store_with(
            ProviderRegistry::new(),
            &[("P1_API_KEY", "k1"), ("P2_API_KEY", "k2")],
        );
        let upstream = ScriptedUpstream::new(vec![err("p1", 429), err("p2", 500)]);
        let router = FallbackRouter::new(
            store,
            upstream,
            vec![routing(
                "m",
                vec![RouteConfig::new("p1", "m-a"), RouteConfig::new("p2", "m-b")],
            )],
        );

        let err = router.execute("m", &request()).await.unwrap_err();
        match err {
            RouterError::Exhausted {
                logical_model,
                attempts,
                final_status,
            } => {
                assert_eq!(logical_model, "m");
                assert_eq!(
                    attempts,
                    vec![
                        RouteAttempt {
                            provider: "p1".to_string(),
                            model: "m-a".to_string(),
                            last_status: Some(429),
                        },
                        RouteAttempt {
                            provider: "p2".to_string(),
                            model: "m-b".to_string(),
                            last_status: Some(500),
                        },
                    ]
                );
                assert_eq!(final_status, Some(500));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_cooldown_preempts_route_and_next_request_skips() {
        let mut providers = HashMap::new();
        providers.insert(
            "p1".to_string(),
            ProviderConfig {
                error_handling: HashMap::from([(
                    "400".to_string(),
                    ErrorRule {
                        action: FailureAction::ProviderCooldown,
                        cooldown_seconds: Some(600),
                    },
                )]),
                ..Default::default()
            },
        );
        let (store, _) = store_with(
            ProviderRegistry::from_providers(providers),
            &[("P1_API_KEY", "k1"), ("P2_API_KEY", "k2")],
        );

        let upstream = ScriptedUpstream::new(vec![err("p1", 400), ok()]);
        let router = FallbackRouter::new(
            store.clone(),
            upstream.clone(),
            vec![routing(
                "m",
                vec![RouteConfig::new("p1", "x"), RouteConfig::new("p2", "x")],
            )],
        );

        let response = router.execute("m", &request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(store.provider_in_cooldown("p1"));

        // A second request within the cooldown window goes straight to p2.
        let upstream2 = ScriptedUpstream::new(vec![ok()]);
        let router2 = FallbackRouter::new(
            store,
            upstream2.clone(),
            vec![routing(
                "m",
                vec![RouteConfig::new("p1", "x"), RouteConfig::new("p2", "x")],
            )],
        );
        router2.execute("m", &request()).await.unwrap();

        let calls = upstream2.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "p2");
    }

    #[tokio::test]
    async fn test_route_without_keys_is_skipped_without_calls() {
        let (store, _) = store_with(ProviderRegistry::new(), &[("P2_API_KEY", "k2")]);
        let upstream = ScriptedUpstream::new(vec![ok()]);
        let router = FallbackRouter::new(
            store,
            upstream.clone(),
            vec![routing(
                "m",
                vec![RouteConfig::new("keyless", "x"), RouteConfig::new("p2", "x")],
            )],
        );

        router.execute("m", &request()).await.unwrap();
        let calls = upstream.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "p2");
    }

    #[tokio::test]
    async fn test_cancellation_propagates_verbatim() {
        let (store, _) = store_with(ProviderRegistry::new(), &[("P1_API_KEY", "k1")]);
        let upstream = ScriptedUpstream::new(vec![Err(UpstreamError::Cancelled)]);
        let router = FallbackRouter::new(
            store,
            upstream,
            vec![routing("m", vec![RouteConfig::new("p1", "x")])],
        );

        let err = router.execute("m", &request()).await.unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
    }

    #[test]
    fn test_resolve_error_action_defaults_and_overrides() {
        let mut providers = HashMap::new();
        providers.insert(
            "cerebras".to_string(),
            ProviderConfig {
                error_handling: HashMap::from([(
                    "400".to_string(),
                    ErrorRule {
                        action: FailureAction::ProviderCooldown,
                        cooldown_seconds: Some(600),
                    },
                )]),
                ..Default::default()
            },
        );
        let (store, _) = store_with(ProviderRegistry::from_providers(providers), &[]);
        let router = FallbackRouter::new(
            store,
            ScriptedUpstream::new(vec![]),
            Vec::<ModelRoutingConfig>::new(),
        );

        let mapped = router.resolve_error_action(
            "cerebras",
            &UpstreamError::Status {
                provider: "cerebras".to_string(),
                status: 400,
                message: String::new(),
            },
        );
        assert_eq!(mapped.action, FailureAction::ProviderCooldown);
        assert_eq!(mapped.cooldown, Some(Duration::from_secs(600)));

        let auth = router.resolve_error_action(
            "cerebras",
            &UpstreamError::Status {
                provider: "cerebras".to_string(),
                status: 401,
                message: String::new(),
            },
        );
        assert_eq!(auth.action, FailureAction::GlobalKeyFailure);
        assert_eq!(auth.cooldown, None);

        let rate = router.resolve_error_action(
            "cerebras",
            &UpstreamError::Status {
                provider: "cerebras".to_string(),
                status: 429,
                message: String::new(),
            },
        );
        assert_eq!(rate.action, FailureAction::ModelKeyFailure);

        // Transport failures without a status demote to the per-route default.
        let transport = router.resolve_error_action("cerebras", &UpstreamError::Cancelled);
        assert_eq!(transport.action, FailureAction::ModelKeyFailure);
    }

    #[test]
    fn test_tracker_cooldown_priority() {
        let mut providers = HashMap::new();
        providers.insert(
            "prov".to_string(),
            ProviderConfig {
                rate_limiting: RateLimitSettings {
                    cooldown_seconds: Some(100),
                },
                models: HashMap::from([(
                    "gpt4".to_string(),
                    ModelSettings {
                        cooldown_seconds: Some(200),
                    },
                )]),
                ..Default::default()
            },
        );
        let (store, _) = store_with(ProviderRegistry::from_providers(providers), &[]);
        let router = FallbackRouter::new(
            store,
            ScriptedUpstream::new(vec![]),
            Vec::<ModelRoutingConfig>::new(),
        );
        let model_config = routing("logical", vec![]);

        // Provider-model override applies.
        let tracker = router.tracker_for_route(&RouteConfig::new("prov", "gpt4"), &model_config);
        assert_eq!(tracker.route_cooldown(), Duration::from_secs(200));
        assert_eq!(tracker.provider_cooldown(), Duration::from_secs(100));

        // Route override wins over everything.
        let tracker = router.tracker_for_route(
            &RouteConfig::new("prov", "gpt4").with_cooldown(50),
            &model_config,
        );
        assert_eq!(tracker.route_cooldown(), Duration::from_secs(50));

        // Unknown model falls back to the logical default.
        let tracker = router.tracker_for_route(&RouteConfig::new("prov", "unknown"), &model_config);
        assert_eq!(tracker.route_cooldown(), Duration::from_secs(300));
    }
}
