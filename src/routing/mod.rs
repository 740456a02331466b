//! Fallback routing across providers and keys.

mod router;
mod upstream;

pub use router::{FallbackRouter, ResolvedAction};
pub use upstream::{HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse};
