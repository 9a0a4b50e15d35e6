//! Short-lived cache of resolved instances.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::ServiceInstance;

#[derive(Debug)]
pub(super) struct InstanceCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    instances: Vec<ServiceInstance>,
    cached_at: Instant,
}

impl InstanceCache {
    pub(super) fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached instances, if present and younger than the TTL.
    pub(super) fn get(&self, function: &str) -> Option<Vec<ServiceInstance>> {
        let fresh = self.entries.get(function).and_then(|entry| {
            (entry.cached_at.elapsed() < self.ttl).then(|| entry.instances.clone())
        });

        if fresh.is_none() {
            self.entries
                .remove_if(function, |_, entry| entry.cached_at.elapsed() >= self.ttl);
        }

        fresh
    }

    /// Caches a non-empty instance set; empty sets are never cached.
    pub(super) fn set(&self, function: &str, instances: Vec<ServiceInstance>) {
        if instances.is_empty() {
            return;
        }

        self.entries.insert(
            function.to_owned(),
            CacheEntry {
                instances,
                cached_at: Instant::now(),
            },
        );
    }

    pub(super) fn invalidate(&self, function: &str) {
        self.entries.remove(function);
    }

    /// Drops one endpoint, and the whole entry once no endpoint is left.
    pub(super) fn evict(&self, function: &str, instance: &ServiceInstance) {
        if let Some(mut entry) = self.entries.get_mut(function) {
            entry.instances.retain(|cached| !cached.same_endpoint(instance));
        }
        self.entries
            .remove_if(function, |_, entry| entry.instances.is_empty());
    }
}
