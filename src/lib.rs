//! ModelRelay: routing and key-rotation core for a multi-provider LLM
//! inference proxy.
//!
//! A request names a *logical model*; the [`FallbackRouter`] resolves it to
//! an ordered chain of concrete (provider, model) routes and drives each
//! route through a [`KeyCycleTracker`] that rotates the provider's API keys
//! round-robin. Failures translate into provider-specific actions: retry
//! with another key, blacklist the key (provider-wide or per model), or put
//! the whole provider in a timed cooldown. The shared [`RotationStore`]
//! carries rotation positions and cooldown windows across requests, in
//! memory only.

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod routing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    FailureAction, ModelRoutingConfig, ProviderConfig, ProviderRegistry, RotationSettings,
    RouteConfig,
};
pub use error::{Error, Result, RouteAttempt, RouterError, UpstreamError};
pub use keys::{KeyCycleTracker, RotationStore, parse_provider_keys};
pub use routing::{FallbackRouter, HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse};
