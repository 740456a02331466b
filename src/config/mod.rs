//! Configuration consumed by the routing core.
//!
//! The provider registry and logical-model routing tables are loaded once
//! and treated as immutable for the lifetime of the process. Rotation
//! settings come from the environment.

mod provider;
mod routing;
mod settings;

pub use provider::{
    ApiKeySettings, ErrorRule, FailureAction, ModelSettings, ProviderConfig, ProviderRegistry,
    RateLimitSettings,
};
pub use routing::{ModelRoutingConfig, RouteConfig};
pub use settings::RotationSettings;
