//! Provider middleware.

pub mod auth;
pub mod metrics;

pub use auth::{BasicAuthLayer, Credentials};
pub use metrics::{spawn_metrics_server, MetricsLayer};
