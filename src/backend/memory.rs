//! In-process, authoritative registry backend (spec §4.1.1). Grounded on
//! the teacher's `BackendManager` in `src/backend/mod.rs`: a `DashMap`
//! keyed by id plus a derived index, under the same "single writer
//! discipline" the teacher documents for its own concurrent maps (spec §5).

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{Backend, BackendError};
use crate::instance::{Filter, Instance, InstanceStatus};
use crate::log;

const DEFAULT_EXPIRATION: Duration = Duration::from_secs(90);

/// Authoritative in-process store: two maps, `id -> instance` and
/// `name -> set of ids` (spec §3's "Service index"). A `Mutex` serializes
/// mutations — `DashMap` alone gives per-entry atomicity, but `register`
/// touches both maps and must not interleave with `cleanup`/`deregister`
/// (spec §5: "single writer discipline").
pub struct MemoryBackend {
    instances: DashMap<String, Instance>,
    by_name: DashMap<String, HashSet<String>>,
    expiration: Duration,
    write_lock: Mutex<()>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_expiration(DEFAULT_EXPIRATION)
    }

    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            instances: DashMap::new(),
            by_name: DashMap::new(),
            expiration,
            write_lock: Mutex::new(()),
        }
    }

    fn remove_from_index(&self, name: &str, id: &str) {
        if let Some(mut ids) = self.by_name.get_mut(name) {
            ids.remove(id);
            if ids.is_empty() {
                drop(ids);
                self.by_name.remove(name);
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn register(&self, instance: Instance) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        self.by_name
            .entry(instance.name.clone())
            .or_default()
            .insert(instance.id.clone());
        self.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        if let Some((_, instance)) = self.instances.remove(id) {
            self.remove_from_index(&instance.name, id);
        }
        Ok(())
    }

    async fn heartbeat(&self, id: &str) {
        let _guard = self.write_lock.lock().await;
        if let Some(mut entry) = self.instances.get_mut(id) {
            entry.last_heartbeat = SystemTime::now();
            entry.status = InstanceStatus::Up;
        }
    }

    async fn get_instances(&self, name: &str, filter: Option<&Filter>) -> Vec<Instance> {
        let now = SystemTime::now();
        let Some(ids) = self.by_name.get(name) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.instances.get(id))
            .filter(|entry| {
                now.duration_since(entry.last_heartbeat)
                    .map(|age| age <= self.expiration)
                    .unwrap_or(true)
            })
            .map(|entry| entry.clone())
            .filter(|inst| filter.map(|f| f.matches(inst)).unwrap_or(true))
            .collect()
    }

    async fn get_instance(&self, id: &str) -> Option<Instance> {
        self.instances.get(id).map(|e| e.clone())
    }

    async fn get_all_services(&self) -> Vec<String> {
        self.by_name.iter().map(|e| e.key().clone()).collect()
    }

    async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut entry) = self.instances.get_mut(id) {
            entry.status = status;
        }
        Ok(())
    }

    async fn cleanup(&self) {
        let _guard = self.write_lock.lock().await;
        let now = SystemTime::now();
        let expired: Vec<(String, String)> = self
            .instances
            .iter()
            .filter(|e| {
                now.duration_since(e.last_heartbeat)
                    .map(|age| age > self.expiration)
                    .unwrap_or(false)
            })
            .map(|e| (e.key().clone(), e.name.clone()))
            .collect();

        for (id, name) in &expired {
            self.instances.remove(id);
            self.remove_from_index(name, id);
        }
        if !expired.is_empty() {
            log::log_debug("memory backend cleanup removed expired instances", &[("count", &expired.len())]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Protocol;

    fn make(id: &str, name: &str, last_heartbeat: SystemTime) -> Instance {
        Instance {
            id: id.to_string(),
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            protocol: Protocol::Http,
            status: InstanceStatus::Up,
            metadata: Default::default(),
            tags: Vec::new(),
            zone: None,
            last_heartbeat,
            registered_at: last_heartbeat,
            health_check_path: None,
            health_check_interval: None,
        }
    }

    #[tokio::test]
    async fn register_then_get_instance_round_trip() {
        // R1 (first half): register -> getInstance(id) returns it.
        let backend = MemoryBackend::new();
        let inst = make("1", "svc", SystemTime::now());
        backend.register(inst.clone()).await.unwrap();
        assert_eq!(backend.get_instance("1").await, Some(inst));
    }

    #[tokio::test]
    async fn deregister_then_get_instance_returns_absent() {
        // R1 (second half).
        let backend = MemoryBackend::new();
        backend.register(make("1", "svc", SystemTime::now())).await.unwrap();
        backend.deregister("1").await.unwrap();
        assert_eq!(backend.get_instance("1").await, None);
        assert!(backend.get_instances("svc", None).await.is_empty());
    }

    #[tokio::test]
    async fn deregister_missing_id_is_a_no_op() {
        let backend = MemoryBackend::new();
        assert!(backend.deregister("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_bumps_last_heartbeat_and_sets_up() {
        // R2.
        let backend = MemoryBackend::new();
        let earlier = SystemTime::now() - Duration::from_secs(10);
        let mut inst = make("1", "svc", earlier);
        inst.status = InstanceStatus::Down;
        backend.register(inst).await.unwrap();

        backend.heartbeat("1").await;

        let after = backend.get_instance("1").await.unwrap();
        assert!(after.last_heartbeat > earlier);
        assert_eq!(after.status, InstanceStatus::Up);
    }

    #[tokio::test]
    async fn heartbeat_on_missing_id_is_a_no_op() {
        let backend = MemoryBackend::new();
        backend.heartbeat("ghost").await;
    }

    #[tokio::test]
    async fn cleanup_removes_expired_and_empties_index() {
        let backend = MemoryBackend::with_expiration(Duration::from_millis(10));
        let stale = SystemTime::now() - Duration::from_secs(1);
        backend.register(make("1", "svc", stale)).await.unwrap();

        backend.cleanup().await;

        assert_eq!(backend.get_instance("1").await, None);
        assert!(backend.get_all_services().await.is_empty());
    }

    #[tokio::test]
    async fn get_instances_excludes_other_services() {
        // P2: getInstances(name) equals the union of its own live ids.
        let backend = MemoryBackend::new();
        backend.register(make("1", "a", SystemTime::now())).await.unwrap();
        backend.register(make("2", "b", SystemTime::now())).await.unwrap();

        let a = backend.get_instances("a", None).await;
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, "1");
    }

    #[tokio::test]
    async fn reregistering_same_id_overwrites() {
        // I1.
        let backend = MemoryBackend::new();
        let mut inst = make("1", "svc", SystemTime::now());
        backend.register(inst.clone()).await.unwrap();
        inst.status = InstanceStatus::OutOfService;
        backend.register(inst).await.unwrap();

        let stored = backend.get_instance("1").await.unwrap();
        assert_eq!(stored.status, InstanceStatus::OutOfService);
        assert_eq!(backend.get_instances("svc", None).await.len(), 1);
    }
}
