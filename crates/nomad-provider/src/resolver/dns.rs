//! DNS fallback for functions the catalog does not know about.

use std::time::Duration;

use super::ServiceInstance;
use crate::config::ConsulConfig;

/// Resolves `<function>.service.<domain>` through the system resolver.
///
/// A records carry no port, so every address is paired with the configured one.
#[derive(Debug, Clone)]
pub struct DnsFallback {
    domain: String,
    port: u16,
    timeout: Duration,
}

impl DnsFallback {
    pub fn new(domain: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            domain: domain.into(),
            port,
            timeout,
        }
    }

    /// Built from the Consul settings, or `None` when the fallback is disabled.
    pub fn from_config(config: &ConsulConfig) -> Option<Self> {
        config
            .dns_enabled
            .then(|| Self::new(config.dns_domain.clone(), config.dns_port, config.timeout))
    }

    pub fn hostname(&self, function: &str) -> String {
        format!("{function}.service.{}", self.domain.trim_matches('.'))
    }

    /// Addresses found for `function`; lookup failures yield an empty list.
    pub async fn lookup(&self, function: &str) -> Vec<ServiceInstance> {
        let target = format!("{}:{}", self.hostname(function), self.port);

        let lookup = tokio::net::lookup_host(target.clone());
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(addrs)) => {
                let mut instances: Vec<ServiceInstance> = Vec::new();
                for addr in addrs {
                    let instance = ServiceInstance::new(addr.ip().to_string(), addr.port());
                    if !instances.iter().any(|seen| seen.same_endpoint(&instance)) {
                        instances.push(instance);
                    }
                }
                instances
            }
            Ok(Err(e)) => {
                tracing::debug!(target = %target, error = %e, "DNS fallback lookup failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    target = %target,
                    timeout = ?self.timeout,
                    "DNS fallback lookup timed out"
                );
                Vec::new()
            }
        }
    }
}
