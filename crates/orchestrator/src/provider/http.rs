//! Generic JSON-over-HTTP provider driven entirely by its descriptor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::DataProvider;
use crate::errors::ProviderError;
use crate::models::{ProviderDescriptor, ProviderQuery, RawResponse};

/// Header used for the API key when the descriptor does not name one.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

const KEY_PLACEHOLDER: &str = "{key}";

/// GETs `base_url + path` with `{key}` replaced by the URL-encoded query key.
///
/// Status mapping: 429 is `RateLimited` (numeric `Retry-After` honoured),
/// any other non-2xx is `Unavailable`, transport timeouts are `Timeout`,
/// remaining transport errors are `Network`.
pub struct HttpJsonProvider {
    descriptor: Arc<ProviderDescriptor>,
    client: Client,
    api_key: Option<String>,
}

impl HttpJsonProvider {
    pub fn new(descriptor: Arc<ProviderDescriptor>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(descriptor.timeout())
            .user_agent(concat!("coinpulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            descriptor,
            client,
            api_key,
        }
    }

    /// Build from a descriptor, reading the API key from the environment
    /// variable it names.
    pub fn from_env(descriptor: Arc<ProviderDescriptor>) -> Self {
        let api_key = descriptor
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        Self::new(descriptor, api_key)
    }

    fn url_for(&self, query: &ProviderQuery) -> String {
        let base = self.descriptor.base_url.trim_end_matches('/');
        match self.descriptor.path.as_deref() {
            Some(path) => {
                let path = path.replace(KEY_PLACEHOLDER, &urlencoding::encode(&query.key));
                if path.starts_with('/') {
                    format!("{base}{path}")
                } else {
                    format!("{base}/{path}")
                }
            }
            None => base.to_string(),
        }
    }

    fn provider(&self) -> String {
        self.descriptor.id.to_string()
    }
}

#[async_trait]
impl DataProvider for HttpJsonProvider {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    async fn call(&self, query: &ProviderQuery) -> Result<RawResponse, ProviderError> {
        if self.descriptor.auth_required && self.api_key.is_none() {
            return Err(ProviderError::Misconfigured {
                provider: self.provider(),
                message: format!(
                    "API key required but {} is not set",
                    self.descriptor.api_key_env.as_deref().unwrap_or("no api_key_env")
                ),
            });
        }

        let url = self.url_for(query);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            let header = self
                .descriptor
                .api_key_header
                .as_deref()
                .unwrap_or(DEFAULT_API_KEY_HEADER);
            request = request.header(header, key);
        }

        debug!(provider = %self.descriptor.id, %url, "http request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    provider: self.provider(),
                    after: self.descriptor.timeout(),
                }
            } else {
                ProviderError::Network {
                    provider: self.provider(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(provider = %self.descriptor.id, ?retry_after, "upstream rate limited");
            return Err(ProviderError::RateLimited {
                provider: self.provider(),
                retry_after,
            });
        }

        if !status.is_success() {
            debug!(provider = %self.descriptor.id, status = status.as_u16(), "upstream error status");
            return Err(ProviderError::Unavailable {
                provider: self.provider(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| ProviderError::Network {
            provider: self.provider(),
            message: format!("failed to read response: {e}"),
        })?;

        Ok(RawResponse::new(status.as_u16(), body))
    }

    fn normalize(&self, raw: RawResponse) -> Result<Value, ProviderError> {
        let value: Value = serde_json::from_str(&raw.body).map_err(|e| ProviderError::UpstreamData {
            provider: self.provider(),
            message: format!("invalid JSON: {e}"),
        })?;

        match self.descriptor.json_pointer.as_deref() {
            Some(pointer) => value
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| ProviderError::UpstreamData {
                    provider: self.provider(),
                    message: format!("missing field at {pointer}"),
                }),
            None => Ok(value),
        }
    }
}
