//! The upstream seam the router drives.
//!
//! The routing core never speaks to provider APIs itself; it hands each
//! attempt to an [`Upstream`] and interprets the outcome. [`HttpUpstream`]
//! is the default implementation, posting OpenAI-compatible chat-completion
//! bodies to the provider's configured base URL. Dialect translation is a
//! separate concern and does not happen here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::ProviderRegistry;
use crate::error::UpstreamError;
use crate::keys::key_hint;

/// A request forwarded to a provider. The body is passed through verbatim
/// except for the `model` field, which the router rewrites per route.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub body: Value,
}

impl UpstreamRequest {
    pub fn new(body: Value) -> Self {
        Self { body }
    }
}

/// A successful upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

/// One attempt against a concrete (provider, model, key) triple.
///
/// Implementations own their own deadlines; the router only observes the
/// result. Any non-success must come back as an error so the router can
/// resolve it to a failure action.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn invoke(
        &self,
        provider: &str,
        model: &str,
        api_key: &str,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

/// Reqwest-backed upstream posting to `{api_base}/chat/completions`.
pub struct HttpUpstream {
    client: Client,
    registry: Arc<ProviderRegistry>,
}

impl HttpUpstream {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, registry }
    }

    fn api_url(&self, provider: &str) -> Option<String> {
        let base = self.registry.get(provider)?.api_base.as_deref()?;
        Some(format!("{}/chat/completions", base.trim_end_matches('/')))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn invoke(
        &self,
        provider: &str,
        model: &str,
        api_key: &str,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self
            .api_url(provider)
            .ok_or_else(|| UpstreamError::InvalidResponse {
                provider: provider.to_string(),
                reason: "no api_base configured".to_string(),
            })?;

        let mut body = request.body.clone();
        if let Value::Object(map) = &mut body {
            map.insert("model".to_string(), Value::String(model.to_string()));
        }

        tracing::debug!(provider, model, key = %key_hint(api_key), %url, "Sending upstream request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await.unwrap_or_default();

        tracing::debug!(provider, status = status.as_u16(), "Upstream response");

        if !status.is_success() {
            return Err(UpstreamError::Status {
                provider: provider.to_string(),
                status: status.as_u16(),
                message: response_text,
            });
        }

        let parsed = serde_json::from_str(&response_text).map_err(|e| {
            UpstreamError::InvalidResponse {
                provider: provider.to_string(),
                reason: format!("JSON parse error: {}", e),
            }
        })?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            body: parsed,
        })
    }
}
