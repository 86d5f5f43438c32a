use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::types::ProviderId;
use crate::errors::FetchError;
use crate::registry::{summarize, AttemptRecord};

/// Where the returned data came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchSource {
    Provider(ProviderId),
    Cache,
    None,
}

impl FetchSource {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Provider(id) => id,
            Self::Cache => "cache",
            Self::None => "none",
        }
    }
}

impl Serialize for FetchSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Successful orchestrated fetch: fresh data, coalesced data or a stale fallback.
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    pub request_id: Uuid,
    pub data: Value,
    pub source: FetchSource,
    pub stale: bool,
    pub attempts: Vec<AttemptRecord>,
}

impl FetchOutcome {
    /// `A: FAILURE (...) -> B: SUCCESS` rendering of the attempts.
    pub fn attempts_summary(&self) -> String {
        summarize(&self.attempts)
    }
}

/// Boundary shape handed to request handlers.
#[derive(Clone, Debug, Serialize)]
pub struct FetchResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub source: FetchSource,
    pub stale: bool,
    pub attempts: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<FetchOutcome, FetchError>> for FetchResponse {
    fn from(result: Result<FetchOutcome, FetchError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                data: Some(outcome.data),
                source: outcome.source,
                stale: outcome.stale,
                attempts: outcome.attempts,
                error: None,
            },
            Err(err) => {
                let error = err.to_string();
                Self {
                    success: false,
                    data: None,
                    source: FetchSource::None,
                    stale: false,
                    attempts: err.into_attempts(),
                    error: Some(error),
                }
            }
        }
    }
}
