use serde_json::Value;

use super::category::Category;
use super::types::QueryKey;

/// Parameters handed to a provider plugin for one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderQuery {
    pub category: Category,
    pub key: QueryKey,
}

impl ProviderQuery {
    pub fn new(category: Category, key: impl Into<QueryKey>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

/// Upstream payload before normalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn json(value: &Value) -> Self {
        Self::ok(value.to_string())
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}
