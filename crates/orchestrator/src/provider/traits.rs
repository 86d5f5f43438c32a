//! Provider plugin interface.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ProviderError;
use crate::models::{ProviderQuery, RawResponse};

/// One upstream API.
///
/// The orchestrator only ever calls [`call`](Self::call) and
/// [`normalize`](Self::normalize); it never looks inside upstream payloads.
/// Implementations must not retry internally: fallback, backoff and circuit
/// breaking are the orchestrator's job.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use coinpulse_orchestrator::errors::ProviderError;
/// use coinpulse_orchestrator::models::{ProviderQuery, RawResponse};
/// use coinpulse_orchestrator::provider::DataProvider;
///
/// struct FearGreed;
///
/// #[async_trait]
/// impl DataProvider for FearGreed {
///     fn id(&self) -> &str {
///         "alternative_me"
///     }
///
///     async fn call(&self, query: &ProviderQuery) -> Result<RawResponse, ProviderError> {
///         // ... perform the request
///     }
/// }
/// ```
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Must match the id of the provider's descriptor.
    fn id(&self) -> &str;

    /// Perform a single upstream request.
    async fn call(&self, query: &ProviderQuery) -> Result<RawResponse, ProviderError>;

    /// Turn a successful raw response into the canonical object.
    ///
    /// The default parses the body as JSON.
    fn normalize(&self, raw: RawResponse) -> Result<Value, ProviderError> {
        serde_json::from_str(&raw.body).map_err(|e| ProviderError::UpstreamData {
            provider: self.id().to_string(),
            message: format!("invalid JSON: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl DataProvider for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        async fn call(&self, query: &ProviderQuery) -> Result<RawResponse, ProviderError> {
            Ok(RawResponse::json(&json!({ "key": &*query.key })))
        }
    }

    #[tokio::test]
    async fn test_default_normalize_parses_json() {
        let provider = Echo;
        let raw = provider
            .call(&ProviderQuery::new(crate::models::Category::News, "btc"))
            .await
            .unwrap();
        assert_eq!(provider.normalize(raw).unwrap(), json!({ "key": "btc" }));
    }

    #[test]
    fn test_default_normalize_rejects_garbage() {
        let err = Echo.normalize(RawResponse::ok("<html>blocked</html>")).unwrap_err();
        assert_eq!(err.code(), "provider.upstream_data");
    }
}
