//! Instance selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::ServiceInstance;

/// Round-robin selection over healthy instances.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Select a healthy instance. Returns `None` if there is none.
    pub fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        let healthy: Vec<&ServiceInstance> = instances.iter().filter(|i| i.healthy).collect();

        match healthy.len() {
            0 => None,
            1 => healthy.first().copied(),
            len => {
                let idx = self.counter.fetch_add(1, Ordering::Relaxed) % len;
                healthy.get(idx).copied()
            }
        }
    }
}
