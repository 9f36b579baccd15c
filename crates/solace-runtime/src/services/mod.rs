//! Store-backed services that sit in front of the TTL cache.

mod context;
mod metrics;
mod portrait;
mod store;

pub use context::{context_key, ContextService, CONTEXT_TTL};
pub use metrics::{
    MetricsService, ADMIN_METRICS_KEY, ADMIN_METRICS_TTL, AVG_MESSAGES_KEY, AVG_MESSAGES_TTL,
};
pub use portrait::{PortraitError, PortraitService};
pub use store::{StoreError, UserStore};
