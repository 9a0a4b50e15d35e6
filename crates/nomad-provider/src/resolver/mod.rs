//! Function name to live endpoint resolution.

mod cache;
mod catalog;
mod catalog_resolver;
mod dns;
mod load_balancer;

pub use catalog::{ConsulCatalog, ServiceCatalog, StaticCatalog};
pub use catalog_resolver::CatalogResolver;
pub use dns::DnsFallback;
pub use load_balancer::LoadBalancer;

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::error::ProviderResult;

/// One resolved replica of a function.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    pub discovered_at: Instant,
    /// Invocation deadline advertised by the function's service registration.
    pub timeout: Option<Duration>,
}

impl ServiceInstance {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            healthy: true,
            discovered_at: Instant::now(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.authority())
    }

    /// Whether both describe the same network endpoint.
    pub fn same_endpoint(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

/// Resolves function names to a live instance.
#[async_trait]
pub trait FunctionResolver: Send + Sync + std::fmt::Debug {
    /// Pick one healthy instance of `function`.
    ///
    /// Fails with `NoInstance` when nothing healthy is registered and
    /// `ResolverUnavailable` when the catalog cannot be queried.
    async fn resolve(&self, function: &str) -> ProviderResult<ServiceInstance>;

    /// Forget everything cached for `function`.
    fn invalidate(&self, function: &str);

    /// Forget one cached endpoint of `function` after a failed connection.
    fn evict(&self, function: &str, instance: &ServiceInstance);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_brackets_ipv6() {
        assert_eq!(ServiceInstance::new("10.0.0.1", 8080).authority(), "10.0.0.1:8080");
        assert_eq!(ServiceInstance::new("::1", 8080).authority(), "[::1]:8080");
        assert_eq!(
            ServiceInstance::new("echo.service.consul", 80).base_url(),
            "http://echo.service.consul:80"
        );
    }

    #[test]
    fn same_endpoint_ignores_metadata() {
        let a = ServiceInstance::new("10.0.0.1", 8080);
        let b = ServiceInstance::new("10.0.0.1", 8080)
            .with_timeout(Some(Duration::from_secs(3)))
            .unhealthy();
        let c = ServiceInstance::new("10.0.0.1", 8081);

        assert!(a.same_endpoint(&b));
        assert!(!a.same_endpoint(&c));
    }
}
