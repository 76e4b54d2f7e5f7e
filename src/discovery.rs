//! Discovery client (spec §4.4): a bounded-freshness cache in front of a
//! backend, with a background refresh loop. Grounded on the teacher's
//! `ToolRegistry` (`src/registry.rs`) for the "DashMap indexed by a string
//! key, background-refreshed" shape, and on `run_health_checker`
//! (`src/backend/health.rs`) for the catch-log-never-propagate loop body.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::balancer::{StrategyFactory, StrategyOptions, UnknownStrategyError};
use crate::config::DiscoveryClientConfig;
use crate::instance::{Filter, Instance};
use crate::log;
use crate::timer::PeriodicTask;

struct CacheEntry {
    instances: Vec<Instance>,
    fetched_at: Instant,
}

pub struct DiscoveryClient {
    config: DiscoveryClientConfig,
    backend: Arc<dyn Backend>,
    cache: DashMap<String, CacheEntry>,
    factory: StrategyFactory,
    refresh_timer: Mutex<Option<PeriodicTask>>,
}

impl DiscoveryClient {
    pub fn new(config: DiscoveryClientConfig, backend: Arc<dyn Backend>) -> Arc<Self> {
        let refresh_interval = config.refresh_interval;
        let client = Arc::new(Self {
            config,
            backend,
            cache: DashMap::new(),
            factory: StrategyFactory::new(),
            refresh_timer: Mutex::new(None),
        });

        if let Some(interval) = refresh_interval {
            let weak = Arc::downgrade(&client);
            let timer = PeriodicTask::start(interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(client) = weak.upgrade() {
                        client.refresh_all().await;
                    }
                }
            });
            // Constructor can't be async; stash synchronously via try_lock,
            // which always succeeds here since nothing else holds the lock yet.
            if let Ok(mut guard) = client.refresh_timer.try_lock() {
                *guard = Some(timer);
            }
        }

        client
    }

    async fn refresh_all(&self) {
        for name in self.backend.get_all_services().await {
            let instances = self.backend.get_instances(&name, None).await;
            self.cache.insert(
                name,
                CacheEntry {
                    instances,
                    fetched_at: Instant::now(),
                },
            );
        }
        log::log_debug("discovery refresh loop completed", &[("services", &self.cache.len())]);
    }

    /// Cache hit iff enabled and the entry's age is under `cacheTTL`
    /// (default 30s). The cached set is always the backend's unfiltered
    /// answer; `filter` is applied on every read (spec §4.4: "this makes
    /// `clearCache` safe when filters change").
    pub async fn get_instances(&self, name: &str, filter: Option<&Filter>) -> Vec<Instance> {
        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(name) {
                if entry.fetched_at.elapsed() < self.config.cache_ttl_or_default() {
                    return entry
                        .instances
                        .iter()
                        .filter(|inst| filter.map(|f| f.matches(inst)).unwrap_or(true))
                        .cloned()
                        .collect();
                }
            }
        }

        let instances = self.backend.get_instances(name, None).await;
        if self.config.cache_enabled {
            self.cache.insert(
                name.to_string(),
                CacheEntry {
                    instances: instances.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        instances
            .into_iter()
            .filter(|inst| filter.map(|f| f.matches(inst)).unwrap_or(true))
            .collect()
    }

    pub async fn get_instance(
        &self,
        name: &str,
        strategy: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<Instance>, UnknownStrategyError> {
        let instances = self.get_instances(name, filter).await;
        let strategy = self.factory.create(strategy, &StrategyOptions::default())?;
        Ok(strategy.choose(&instances, None))
    }

    pub async fn get_all_services(&self) -> Vec<String> {
        self.backend.get_all_services().await
    }

    /// The connection-counter instance backing this client's `choose` calls
    /// for `least-connections` — shared with the service client so its
    /// increment/decrement accounting actually affects selection.
    pub fn least_connections(&self) -> Arc<crate::balancer::LeastConnectionsStrategy> {
        self.factory.least_connections()
    }

    /// Drop one service's cache entry, or every entry when `name` is `None`.
    pub fn clear_cache(&self, name: Option<&str>) {
        match name {
            Some(n) => {
                self.cache.remove(n);
            }
            None => self.cache.clear(),
        }
    }

    /// Stops the refresh loop and clears the cache. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.refresh_timer.lock().await;
        if let Some(mut timer) = guard.take() {
            timer.stop().await;
        }
        self.cache.clear();
    }
}
