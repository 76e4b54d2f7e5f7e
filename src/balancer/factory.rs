//! Strategy factory (spec §4.3): a name -> implementation registry,
//! pre-populated with the five stateless/shared strategies; `create`
//! instantiates a fresh `ZoneAware` per call (it's parameterized by the
//! caller's preferred zone) and returns the shared instance for everything
//! else.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use super::strategy::{
    IpHashStrategy, LeastConnectionsStrategy, LoadBalancingStrategy, RandomStrategy,
    RoundRobinStrategy, WeightedRoundRobinStrategy, ZoneAwareStrategy,
};

#[derive(Error, Debug)]
#[error("unknown load-balancing strategy '{0}'")]
pub struct UnknownStrategyError(pub String);

/// Options accepted by [`StrategyFactory::create`]. Only `ZoneAware` reads
/// `zone`; every other strategy ignores it.
#[derive(Debug, Clone, Default)]
pub struct StrategyOptions {
    pub zone: Option<String>,
}

pub struct StrategyFactory {
    shared: DashMap<String, Arc<dyn LoadBalancingStrategy>>,
    least_connections: Arc<LeastConnectionsStrategy>,
}

impl StrategyFactory {
    pub fn new() -> Self {
        let least_connections = Arc::new(LeastConnectionsStrategy::default());
        let shared: DashMap<String, Arc<dyn LoadBalancingStrategy>> = DashMap::new();
        shared.insert("round-robin".to_string(), Arc::new(RoundRobinStrategy::default()));
        shared.insert("random".to_string(), Arc::new(RandomStrategy));
        // Same allocation as `least_connections` below, unsize-coerced — the
        // service client's increment/decrement calls must be visible to
        // whichever instance `choose` picks (spec §4.5 step 1c/1e).
        shared.insert(
            "least-connections".to_string(),
            Arc::clone(&least_connections) as Arc<dyn LoadBalancingStrategy>,
        );
        shared.insert(
            "weighted-round-robin".to_string(),
            Arc::new(WeightedRoundRobinStrategy::default()),
        );
        shared.insert("ip-hash".to_string(), Arc::new(IpHashStrategy));
        Self { shared, least_connections }
    }

    /// Returns the shared instance for every strategy except `zone-aware`,
    /// which is freshly constructed from `options.zone` on each call.
    pub fn create(
        &self,
        name: &str,
        options: &StrategyOptions,
    ) -> Result<Arc<dyn LoadBalancingStrategy>, UnknownStrategyError> {
        if name == "zone-aware" {
            return Ok(Arc::new(ZoneAwareStrategy::new(options.zone.clone())));
        }
        self.shared
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| UnknownStrategyError(name.to_string()))
    }

    /// The same `LeastConnections` instance `create("least-connections", _)`
    /// returns, typed concretely so the service client can call
    /// `increment`/`decrement` directly (spec §4.5 step 1c/1e).
    pub fn least_connections(&self) -> Arc<LeastConnectionsStrategy> {
        Arc::clone(&self.least_connections)
    }
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new()
    }
}
