//! Provider plugins.
//!
//! - `traits` - the [`DataProvider`] interface consumed by the orchestrator
//! - `http` - [`HttpJsonProvider`], a descriptor-driven JSON client

mod http;
mod traits;

pub use http::{HttpJsonProvider, DEFAULT_API_KEY_HEADER};
pub use traits::DataProvider;
