//! Catalog-backed resolver with caching and DNS fallback.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::cache::InstanceCache;
use super::{DnsFallback, FunctionResolver, LoadBalancer, ServiceCatalog, ServiceInstance};
use crate::config::ConsulConfig;
use crate::error::{ProviderError, ProviderResult};

/// Resolves functions through a [`ServiceCatalog`].
#[derive(Debug)]
pub struct CatalogResolver {
    catalog: Arc<dyn ServiceCatalog>,
    cache: Option<InstanceCache>,
    dns: Option<DnsFallback>,
    lookup_timeout: Duration,
    balancer: LoadBalancer,
}

impl CatalogResolver {
    pub fn new(catalog: Arc<dyn ServiceCatalog>, lookup_timeout: Duration) -> Self {
        Self {
            catalog,
            cache: None,
            dns: None,
            lookup_timeout,
            balancer: LoadBalancer::new(),
        }
    }

    /// Resolver configured from the Consul settings.
    pub fn from_config(catalog: Arc<dyn ServiceCatalog>, config: &ConsulConfig) -> Self {
        Self::new(catalog, config.timeout)
            .with_cache_ttl(config.cache_ttl)
            .with_dns(DnsFallback::from_config(config))
    }

    /// Cache resolutions for `ttl`; a zero TTL disables caching.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = (!ttl.is_zero()).then(|| InstanceCache::new(ttl));
        self
    }

    #[must_use]
    pub fn with_dns(mut self, dns: Option<DnsFallback>) -> Self {
        self.dns = dns;
        self
    }

    async fn discover(&self, function: &str) -> ProviderResult<Vec<ServiceInstance>> {
        let registered = tokio::time::timeout(
            self.lookup_timeout,
            self.catalog.healthy_instances(function),
        )
        .await
        .map_err(|_| {
            ProviderError::ResolverUnavailable(format!(
                "catalog query for {function} timed out after {:?}",
                self.lookup_timeout
            ))
        })??;

        let healthy: Vec<ServiceInstance> =
            registered.into_iter().filter(|i| i.healthy).collect();
        if !healthy.is_empty() {
            return Ok(healthy);
        }

        match &self.dns {
            Some(dns) => {
                let found = dns.lookup(function).await;
                if !found.is_empty() {
                    tracing::debug!(
                        function = %function,
                        hostname = %dns.hostname(function),
                        instances = found.len(),
                        "Resolved through DNS fallback"
                    );
                }
                Ok(found)
            }
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl FunctionResolver for CatalogResolver {
    async fn resolve(&self, function: &str) -> ProviderResult<ServiceInstance> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(function) {
                if let Some(instance) = self.balancer.select(&cached) {
                    return Ok(instance.clone());
                }
            }
        }

        let instances = self.discover(function).await?;

        let selected = self
            .balancer
            .select(&instances)
            .cloned()
            .ok_or_else(|| ProviderError::NoInstance(function.to_owned()))?;

        if let Some(cache) = &self.cache {
            cache.set(function, instances);
        }

        Ok(selected)
    }

    fn invalidate(&self, function: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(function);
        }
    }

    fn evict(&self, function: &str, instance: &ServiceInstance) {
        if let Some(cache) = &self.cache {
            cache.evict(function, instance);
            tracing::debug!(
                function = %function,
                instance = %instance.authority(),
                "Evicted instance from resolver cache"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticCatalog;

    fn resolver(catalog: &Arc<StaticCatalog>) -> CatalogResolver {
        CatalogResolver::new(catalog.clone(), Duration::from_secs(1))
            .with_cache_ttl(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn resolves_healthy_instance() {
        let catalog = Arc::new(StaticCatalog::new());
        catalog.set(
            "echo",
            vec![
                ServiceInstance::new("10.0.0.1", 8080).unhealthy(),
                ServiceInstance::new("10.0.0.2", 8080),
            ],
        );

        let instance = resolver(&catalog).resolve("echo").await.unwrap();
        assert_eq!(instance.host, "10.0.0.2");
    }

    #[tokio::test]
    async fn no_instance_without_dns() {
        let catalog = Arc::new(StaticCatalog::new());
        catalog.set("echo", vec![ServiceInstance::new("10.0.0.1", 8080).unhealthy()]);

        let err = resolver(&catalog).resolve("echo").await.unwrap_err();
        assert!(matches!(err, ProviderError::NoInstance(name) if name == "echo"));
    }

    #[tokio::test]
    async fn catalog_failure_is_unavailable() {
        let catalog = Arc::new(StaticCatalog::new());
        catalog.set_unavailable(true);

        let err = resolver(&catalog).resolve("echo").await.unwrap_err();
        assert!(matches!(err, ProviderError::ResolverUnavailable(_)));
    }

    #[tokio::test]
    async fn cache_bounds_catalog_queries() {
        let catalog = Arc::new(StaticCatalog::single(
            "echo",
            ServiceInstance::new("10.0.0.1", 8080),
        ));
        let resolver = resolver(&catalog);

        for _ in 0..5 {
            resolver.resolve("echo").await.unwrap();
        }
        assert_eq!(catalog.queries(), 1);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let catalog = Arc::new(StaticCatalog::new());
        let resolver = resolver(&catalog);

        assert!(resolver.resolve("echo").await.is_err());
        catalog.set("echo", vec![ServiceInstance::new("10.0.0.1", 8080)]);
        assert!(resolver.resolve("echo").await.is_ok());
    }

    #[tokio::test]
    async fn eviction_forces_requery() {
        let catalog = Arc::new(StaticCatalog::single(
            "echo",
            ServiceInstance::new("10.0.0.1", 8080),
        ));
        let resolver = resolver(&catalog);

        let first = resolver.resolve("echo").await.unwrap();
        catalog.set("echo", vec![ServiceInstance::new("10.0.0.7", 8080)]);

        // Still served from cache
        assert_eq!(resolver.resolve("echo").await.unwrap().host, "10.0.0.1");

        resolver.evict("echo", &first);
        assert_eq!(resolver.resolve("echo").await.unwrap().host, "10.0.0.7");
        assert_eq!(catalog.queries(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_requery() {
        let catalog = Arc::new(StaticCatalog::single(
            "echo",
            ServiceInstance::new("10.0.0.1", 8080),
        ));
        let resolver = resolver(&catalog);

        resolver.resolve("echo").await.unwrap();
        catalog.remove("echo");
        resolver.invalidate("echo");

        assert!(matches!(
            resolver.resolve("echo").await,
            Err(ProviderError::NoInstance(_))
        ));
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let catalog = Arc::new(StaticCatalog::single(
            "echo",
            ServiceInstance::new("10.0.0.1", 8080),
        ));
        let resolver = CatalogResolver::new(catalog.clone(), Duration::from_secs(1))
            .with_cache_ttl(Duration::ZERO);

        resolver.resolve("echo").await.unwrap();
        resolver.resolve("echo").await.unwrap();
        assert_eq!(catalog.queries(), 2);
    }
}
