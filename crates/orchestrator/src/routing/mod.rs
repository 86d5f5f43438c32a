//! Provider selection and the fallback orchestrator.
//!
//! - `strategy` - the five rotation policies as a closed enum
//! - `pool` - per-category pools with runtime membership changes
//! - `orchestrator` - ranked fallback walk, caching and status export

mod orchestrator;
mod pool;
mod strategy;

pub use orchestrator::{FetchRequest, Orchestrator, OrchestratorBuilder, ProviderStatus};
pub(crate) use pool::resolve_members;
pub use pool::{Pool, PoolInfo, PoolManager};
pub use strategy::{rank, Candidate, RotationStrategy};
