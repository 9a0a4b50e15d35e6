//! Function provider for Nomad.
//!
//! Functions are deployed as Nomad service jobs, discovered through the
//! Consul catalog and invoked through a streaming reverse proxy. The HTTP
//! surface follows the OpenFaaS provider API.

pub mod api;
pub mod config;
pub mod error;
pub mod function;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod nomad;
pub mod proxy;
pub mod replicas;
pub mod resolver;
pub mod server;
pub mod types;

pub use config::ProviderConfig;
pub use error::{ProviderError, ProviderResult};
pub use server::run;
