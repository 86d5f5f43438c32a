//! Orchestration models
//!
//! - `types` - Identifier aliases (ProviderId, QueryKey)
//! - `category` - Data categories served by pools
//! - `descriptor` - Static provider metadata (ProviderDescriptor, RateLimitSpec)
//! - `query` - Plugin input/output (ProviderQuery, RawResponse)
//! - `outcome` - Fetch results (FetchOutcome, FetchResponse, FetchSource)

mod category;
mod descriptor;
mod outcome;
mod query;
mod types;

pub use category::Category;
pub use descriptor::{ProviderDescriptor, RateLimitSpec};
pub use outcome::{FetchOutcome, FetchResponse, FetchSource};
pub use query::{ProviderQuery, RawResponse};
pub use types::{ProviderId, QueryKey};
