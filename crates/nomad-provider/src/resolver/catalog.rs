//! Service catalog backends.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use super::ServiceInstance;
use crate::config::{parse_duration, ConsulConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::job::TIMEOUT_META;

/// Source of registered service instances.
#[async_trait]
pub trait ServiceCatalog: Send + Sync + std::fmt::Debug {
    /// Instances registered for `service`, with their health.
    async fn healthy_instances(&self, service: &str) -> ProviderResult<Vec<ServiceInstance>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: NodeEntry,
    service: ServiceEntry,
    #[serde(default)]
    checks: Vec<CheckEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckEntry {
    status: String,
}

impl HealthEntry {
    fn into_instance(self) -> ServiceInstance {
        let host = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };

        let timeout = self
            .service
            .meta
            .as_ref()
            .and_then(|meta| meta.get(TIMEOUT_META))
            .and_then(|raw| parse_duration(raw).ok());

        let instance = ServiceInstance::new(host, self.service.port).with_timeout(timeout);
        if self.checks.iter().all(|check| check.status == "passing") {
            instance
        } else {
            instance.unhealthy()
        }
    }
}

/// Catalog backed by the Consul health API.
#[derive(Debug, Clone)]
pub struct ConsulCatalog {
    client: Client,
    base_url: String,
    acl_token: Option<String>,
}

impl ConsulCatalog {
    pub fn new(config: &ConsulConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("consul client: {e}")))?;

        let address = config.address.trim_end_matches('/');
        let base_url = if address.contains("://") {
            address.to_owned()
        } else {
            format!("http://{address}")
        };

        Ok(Self {
            client,
            base_url,
            acl_token: config.acl_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl ServiceCatalog for ConsulCatalog {
    async fn healthy_instances(&self, service: &str) -> ProviderResult<Vec<ServiceInstance>> {
        let url = format!("{}/v1/health/service/{service}", self.base_url);
        let mut request = self.client.get(&url).query(&[("passing", "true")]);
        if let Some(token) = &self.acl_token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::ResolverUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::ResolverUnavailable(format!(
                "catalog query for {service} returned {}",
                response.status()
            )));
        }

        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| ProviderError::ResolverUnavailable(format!("invalid catalog response: {e}")))?;

        Ok(entries.into_iter().map(HealthEntry::into_instance).collect())
    }
}

/// Catalog with fixed, mutable contents.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    services: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    unavailable: AtomicBool,
    queries: AtomicUsize,
}

impl StaticCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with one healthy instance of `service`.
    #[must_use]
    pub fn single(service: &str, instance: ServiceInstance) -> Self {
        let catalog = Self::new();
        catalog.set(service, vec![instance]);
        catalog
    }

    pub fn set(&self, service: &str, instances: Vec<ServiceInstance>) {
        if let Ok(mut services) = self.services.write() {
            services.insert(service.to_owned(), instances);
        }
    }

    pub fn remove(&self, service: &str) {
        if let Ok(mut services) = self.services.write() {
            services.remove(service);
        }
    }

    /// Make every query fail as if the catalog were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of queries served so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceCatalog for StaticCatalog {
    async fn healthy_instances(&self, service: &str) -> ProviderResult<Vec<ServiceInstance>> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::ResolverUnavailable(
                "catalog unavailable".into(),
            ));
        }

        let services = self
            .services
            .read()
            .map_err(|_| ProviderError::internal("lock poisoned"))?;

        Ok(services.get(service).cloned().unwrap_or_default())
    }
}
