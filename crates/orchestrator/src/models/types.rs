use std::sync::Arc;

/// Provider identifier, loaded from configuration at runtime
pub type ProviderId = Arc<str>;

/// Logical query key within a category (e.g. "BTC", "BTC:1h")
pub type QueryKey = Arc<str>;
