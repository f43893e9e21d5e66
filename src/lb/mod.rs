//! Instance selection strategies. Eligibility is shared: an instance is
//! selectable when it is enabled and its gray flag matches the request's.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;

use crate::error::GatewayError;
use crate::models::ServiceInstance;
use crate::registry::Registry;

pub const STRATEGY_RANDOM: &str = "random";
pub const STRATEGY_ROUND_ROBIN: &str = "round_robin";

/// A load balancing strategy for one service
pub trait LoadBalance: Send + Sync {
    fn name(&self) -> &'static str;

    /// Choose an instance for the service, honoring the gray flag
    fn choose(&self, unique_id: &str, gray: bool) -> Result<ServiceInstance, GatewayError>;
}

fn eligible_instances(registry: &Registry, unique_id: &str, gray: bool) -> Vec<ServiceInstance> {
    registry
        .get_instances(unique_id)
        .into_iter()
        .filter(|i| i.enable && i.gray == gray)
        .collect()
}

/// Uniformly random selection
pub struct RandomLoadBalance {
    registry: Arc<Registry>,
}

impl RandomLoadBalance {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl LoadBalance for RandomLoadBalance {
    fn name(&self) -> &'static str {
        STRATEGY_RANDOM
    }

    fn choose(&self, unique_id: &str, gray: bool) -> Result<ServiceInstance, GatewayError> {
        let eligible = eligible_instances(&self.registry, unique_id, gray);
        if eligible.is_empty() {
            return Err(GatewayError::ServiceInstanceNotFound(unique_id.to_string()));
        }

        let index = rand::thread_rng().gen_range(0..eligible.len());
        tracing::debug!(
            "Random selected instance {} for {}",
            eligible[index].service_instance_id,
            unique_id
        );
        Ok(eligible[index].clone())
    }
}

/// Rotating selection over the sorted eligible set.
///
/// One strictly monotonic counter per service; selection indexes the
/// already-filtered set, so a disabled instance never advances the counter
/// twice.
pub struct RoundRobinLoadBalance {
    registry: Arc<Registry>,
    counters: DashMap<String, Arc<AtomicUsize>>,
}

impl RoundRobinLoadBalance {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            counters: DashMap::new(),
        }
    }

    fn counter(&self, unique_id: &str) -> Arc<AtomicUsize> {
        self.counters
            .entry(unique_id.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn name(&self) -> &'static str {
        STRATEGY_ROUND_ROBIN
    }

    fn choose(&self, unique_id: &str, gray: bool) -> Result<ServiceInstance, GatewayError> {
        let eligible = eligible_instances(&self.registry, unique_id, gray);
        if eligible.is_empty() {
            return Err(GatewayError::ServiceInstanceNotFound(unique_id.to_string()));
        }

        let counter = self.counter(unique_id);
        let current = counter.fetch_add(1, Ordering::SeqCst);
        let index = current % eligible.len();

        tracing::debug!(
            "Round robin selected instance {} (index {}) for {}",
            eligible[index].service_instance_id,
            index,
            unique_id
        );
        Ok(eligible[index].clone())
    }
}

/// Hands out the per-strategy singletons the load balance filter picks from
pub struct LoadBalanceFactory {
    random: Arc<RandomLoadBalance>,
    round_robin: Arc<RoundRobinLoadBalance>,
}

impl LoadBalanceFactory {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            random: Arc::new(RandomLoadBalance::new(registry.clone())),
            round_robin: Arc::new(RoundRobinLoadBalance::new(registry)),
        }
    }

    /// Resolve a strategy by its config key; unknown names fall back to
    /// random, matching the default.
    pub fn strategy(&self, name: &str) -> Arc<dyn LoadBalance> {
        match name {
            STRATEGY_ROUND_ROBIN => self.round_robin.clone(),
            STRATEGY_RANDOM => self.random.clone(),
            other => {
                tracing::warn!("Unknown load balance strategy '{}', using random", other);
                self.random.clone()
            }
        }
    }
}
