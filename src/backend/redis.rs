//! Distributed, TTL-expiring registry backend (spec §4.1.2). Grounded on
//! the key-schema documentation convention in
//! `other_examples/783c7b0a_guyernest-rust-mcp-sdk__crates-pmcp-tasks-src-store-redis.rs.rs`
//! (explicit key-layout doc comment, `redis::aio` connection type) and on
//! the SCAN/passing-filter pattern in
//! `other_examples/c10fd175_harborgrid-justin-rusty-db__src-networking-discovery-consul.rs.rs`.
//!
//! Key layout (spec §6):
//! - `{prefix}instance:{id}` — JSON instance, TTL = `ttl` s.
//! - `{prefix}service:{name}` — SET of ids, TTL = `2*ttl` s.
//!
//! No Lua scripting is needed here (unlike the CAS-script pattern in the
//! grounding example above) — every operation in spec §4.1.2 is a plain
//! read, write, or SET membership change; nothing requires atomic
//! check-and-set across keys.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ::redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{Backend, BackendError};
use crate::config::RedisBackendConfig;
use crate::instance::{Filter, Instance, InstanceStatus};
use crate::log;

pub struct RedisBackend {
    config: RedisBackendConfig,
    connection: Mutex<Option<::redis::aio::ConnectionManager>>,
    connected: AtomicBool,
}

impl RedisBackend {
    pub fn new(config: RedisBackendConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Establish the connection-manager. Idempotent.
    pub async fn connect(&self) -> Result<(), BackendError> {
        let mut guard = self.connection.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let client = ::redis::Client::open(self.config.url())
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        *guard = Some(manager);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Release the connection. Idempotent.
    pub async fn close_connection(&self) {
        let mut guard = self.connection.lock().await;
        *guard = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn instance_key(&self, id: &str) -> String {
        format!("{}instance:{id}", self.config.key_prefix)
    }

    fn service_key(&self, name: &str) -> String {
        format!("{}service:{name}", self.config.key_prefix)
    }

    async fn connection(&self) -> Result<::redis::aio::ConnectionManager, BackendError> {
        let guard = self.connection.lock().await;
        guard
            .clone()
            .ok_or_else(|| BackendError::NotConnected("redis".to_string()))
    }
}

/// Decides which ids a service SET should drop, given each id's
/// instance-key existence in the same order. Returns the stale ids and
/// whether the set is empty once they're removed.
fn reconcile_service_set(ids: &[String], exists: &[bool]) -> (Vec<String>, bool) {
    let stale: Vec<String> = ids
        .iter()
        .zip(exists)
        .filter(|(_, &present)| !present)
        .map(|(id, _)| id.clone())
        .collect();
    let remaining = ids.len() - stale.len();
    (stale, remaining == 0)
}

#[async_trait::async_trait]
impl Backend for RedisBackend {
    async fn register(&self, instance: Instance) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&instance).map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        let ttl = self.config.ttl_secs;

        let _: () = conn
            .set_ex(self.instance_key(&instance.id), payload, ttl)
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;

        let service_key = self.service_key(&instance.name);
        let _: () = conn
            .sadd(&service_key, &instance.id)
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        let _: () = conn
            .expire(&service_key, (ttl * 2) as i64)
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let Some(instance) = self.get_instance(id).await else {
            return Ok(());
        };
        let _: () = conn
            .del(self.instance_key(id))
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        let _: () = conn
            .srem(self.service_key(&instance.name), id)
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn heartbeat(&self, id: &str) {
        let Ok(mut conn) = self.connection().await else {
            log::log_warn("redis heartbeat skipped: not connected", &[("id", &id)]);
            return;
        };
        let Some(mut instance) = self.get_instance(id).await else {
            return;
        };
        instance.last_heartbeat = std::time::SystemTime::now();
        instance.status = InstanceStatus::Up;
        let Ok(payload) = serde_json::to_string(&instance) else {
            return;
        };
        let result: Result<(), _> = conn.set_ex(self.instance_key(id), payload, self.config.ttl_secs).await;
        if let Err(e) = result {
            log::log_error("redis heartbeat write failed", &[("id", &id), ("error", &e)]);
        }
    }

    async fn get_instances(&self, name: &str, filter: Option<&Filter>) -> Vec<Instance> {
        let Ok(mut conn) = self.connection().await else {
            log::log_error("redis getInstances failed: not connected", &[("name", &name)]);
            return Vec::new();
        };
        let ids: Vec<String> = match conn.smembers(self.service_key(name)).await {
            Ok(ids) => ids,
            Err(e) => {
                log::log_error("redis SMEMBERS failed", &[("name", &name), ("error", &e)]);
                return Vec::new();
            }
        };
        if ids.is_empty() {
            return Vec::new();
        }
        let keys: Vec<String> = ids.iter().map(|id| self.instance_key(id)).collect();
        let values: Vec<Option<String>> = match conn.mget(&keys).await {
            Ok(v) => v,
            Err(e) => {
                log::log_error("redis MGET failed", &[("name", &name), ("error", &e)]);
                return Vec::new();
            }
        };
        values
            .into_iter()
            .flatten()
            .filter_map(|raw| serde_json::from_str::<Instance>(&raw).ok())
            .filter(|inst| filter.map(|f| f.matches(inst)).unwrap_or(true))
            .collect()
    }

    async fn get_instance(&self, id: &str) -> Option<Instance> {
        let mut conn = self.connection().await.ok()?;
        let raw: Option<String> = conn.get(self.instance_key(id)).await.ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn get_all_services(&self) -> Vec<String> {
        let Ok(mut conn) = self.connection().await else {
            log::log_error("redis getAllServices failed: not connected", &[]);
            return Vec::new();
        };
        let pattern = format!("{}service:*", self.config.key_prefix);
        let prefix_len = format!("{}service:", self.config.key_prefix).len();

        let mut services = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = match ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    log::log_error("redis SCAN failed", &[("error", &e)]);
                    break;
                }
            };
            services.extend(keys.into_iter().map(|k| k[prefix_len..].to_string()));
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        services
    }

    async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let Some(mut instance) = self.get_instance(id).await else {
            return Ok(());
        };
        instance.status = status;
        let payload = serde_json::to_string(&instance).map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        let _: () = conn
            .set_ex(self.instance_key(id), payload, self.config.ttl_secs)
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn cleanup(&self) {
        let Ok(mut conn) = self.connection().await else {
            return;
        };
        for name in self.get_all_services().await {
            let service_key = self.service_key(&name);
            let ids: Vec<String> = conn.smembers(&service_key).await.unwrap_or_default();
            let mut exists = Vec::with_capacity(ids.len());
            for id in &ids {
                exists.push(conn.exists(self.instance_key(id)).await.unwrap_or(true));
            }
            let (stale, now_empty) = reconcile_service_set(&ids, &exists);
            for id in &stale {
                let _: Result<(), _> = conn.srem(&service_key, id).await;
            }
            if now_empty {
                let _: Result<(), _> = conn.del(&service_key).await;
            }
        }
    }

    async fn close(&self) {
        self.close_connection().await;
    }
}

impl Default for RedisBackend {
    fn default() -> Self {
        Self::new(RedisBackendConfig::default())
    }
}

#[allow(dead_code)]
fn _assert_ttl_is_duration(_: Duration) {}
