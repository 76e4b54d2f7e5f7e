//! TTL-check registry backend (spec §4.1.3). Grounded directly on
//! `other_examples/c10fd175_harborgrid-justin-rusty-db__src-networking-discovery-consul.rs.rs`
//! (the `reqwest`-against-agent-API shape, `parse_health_status` mapping
//! critical/warning/passing to instance status, and the periodic
//! check-pass task), adapted to start/stop renewal through this crate's
//! [`crate::timer::PeriodicTask`] instead of a bare `tokio::spawn`.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Backend, BackendError};
use crate::config::{parse_consul_ttl, ConsulBackendConfig};
use crate::instance::{Filter, Instance, InstanceStatus, Protocol};
use crate::log;
use crate::timer::PeriodicTask;

/// `ceil(2 * ttl / 3)` (spec §4.1.3: "passes the TTL check every
/// `⌈2·ttl/3⌉` seconds").
fn renewal_interval(ttl: Duration) -> Duration {
    let secs = ttl.as_secs().max(1);
    let renewal = (secs * 2).div_ceil(3);
    Duration::from_secs(renewal.max(1))
}

#[derive(Debug, Deserialize)]
struct HealthServiceEntry {
    #[serde(rename = "Service")]
    service: ConsulService,
    #[serde(rename = "Checks")]
    checks: Vec<ConsulCheck>,
}

#[derive(Debug, Deserialize)]
struct ConsulService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    name: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
    #[serde(rename = "Meta", default)]
    meta: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ConsulCheck {
    #[serde(rename = "Status")]
    status: String,
}

/// Status is derived from the check array: critical -> DOWN (first one
/// wins), warning -> STARTING, else UP (spec §4.1.3).
fn status_from_checks(checks: &[ConsulCheck]) -> InstanceStatus {
    let mut status = InstanceStatus::Up;
    for check in checks {
        match check.status.as_str() {
            "critical" => return InstanceStatus::Down,
            "warning" => status = InstanceStatus::Starting,
            _ => {}
        }
    }
    status
}

fn entry_to_instance(entry: HealthServiceEntry) -> Instance {
    let status = status_from_checks(&entry.checks);
    let zone = entry.service.meta.get("zone").cloned();
    let registered_at = entry
        .service
        .meta
        .get("registeredAt")
        .and_then(|s| httpdate_or_rfc3339(s))
        .unwrap_or_else(std::time::SystemTime::now);
    Instance {
        id: entry.service.id,
        name: entry.service.name,
        host: entry.service.address,
        port: entry.service.port,
        protocol: Protocol::Http,
        status,
        metadata: entry
            .service
            .meta
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect(),
        tags: entry.service.tags,
        zone,
        last_heartbeat: std::time::SystemTime::now(),
        registered_at,
        health_check_path: None,
        health_check_interval: None,
    }
}

fn httpdate_or_rfc3339(s: &str) -> Option<std::time::SystemTime> {
    humantime::parse_rfc3339(s).ok()
}

pub struct ConsulBackend {
    config: ConsulBackendConfig,
    http: reqwest::Client,
    ttl_timers: DashMap<String, PeriodicTask>,
}

impl ConsulBackend {
    pub fn new(config: ConsulBackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            ttl_timers: DashMap::new(),
        }
    }

    fn check_id(id: &str) -> String {
        format!("service:{id}")
    }

    async fn check_pass(http: &reqwest::Client, address: &str, token: Option<&str>, id: &str) {
        let url = format!("{address}/v1/agent/check/pass/{}", Self::check_id(id));
        let mut req = http.put(&url);
        if let Some(t) = token {
            req = req.header("X-Consul-Token", t);
        }
        if let Err(e) = req.send().await {
            log::log_warn("consul check-pass failed", &[("id", &id), ("error", &e)]);
        }
    }

    fn start_renewal(&self, id: &str, ttl: Duration) {
        let address = self.config.address();
        let token = self.config.token.clone();
        let http = self.http.clone();
        let id_owned = id.to_string();
        let task = PeriodicTask::start(renewal_interval(ttl), move || {
            let http = http.clone();
            let address = address.clone();
            let token = token.clone();
            let id = id_owned.clone();
            async move {
                Self::check_pass(&http, &address, token.as_deref(), &id).await;
            }
        });
        self.ttl_timers.insert(id.to_string(), task);
    }
}

#[async_trait::async_trait]
impl Backend for ConsulBackend {
    async fn register(&self, instance: Instance) -> Result<(), BackendError> {
        let ttl_duration = parse_consul_ttl(&self.config.ttl);
        let registered_at = humantime::format_rfc3339_seconds(instance.registered_at).to_string();

        let mut meta: serde_json::Map<String, serde_json::Value> = instance
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        meta.insert("registeredAt".to_string(), json!(registered_at));
        if let Some(zone) = &instance.zone {
            meta.insert("zone".to_string(), json!(zone));
        }

        let body = json!({
            "ID": instance.id,
            "Name": instance.name,
            "Address": instance.host,
            "Port": instance.port,
            "Tags": instance.tags,
            "Meta": meta,
            "Check": {
                "TTL": self.config.ttl,
                "DeregisterCriticalServiceAfter": "90s",
            }
        });

        let url = format!("{}/v1/agent/service/register", self.config.address());
        let mut req = self.http.put(&url).json(&body);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        req.send()
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?
            .error_for_status()
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;

        self.start_renewal(&instance.id, ttl_duration);
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), BackendError> {
        self.ttl_timers.remove(id);
        let url = format!("{}/v1/agent/service/deregister/{id}", self.config.address());
        let mut req = self.http.put(&url);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        // Idempotent: Consul returns 200 even if the id is unknown.
        let _ = req.send().await;
        Ok(())
    }

    async fn heartbeat(&self, id: &str) {
        Self::check_pass(&self.http, &self.config.address(), self.config.token.as_deref(), id).await;
    }

    async fn get_instances(&self, name: &str, filter: Option<&Filter>) -> Vec<Instance> {
        // Double-filter (DESIGN NOTES): pass passing=true to Consul when the
        // caller explicitly wants only UP instances, and always re-filter
        // client-side against the status derived from the check array.
        let mut url = format!("{}/v1/health/service/{name}", self.config.address());
        if matches!(filter.and_then(|f| f.status), Some(InstanceStatus::Up)) {
            url.push_str("?passing=true");
        }
        let mut req = self.http.get(&url);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                log::log_error("consul health query failed", &[("name", &name), ("error", &e)]);
                return Vec::new();
            }
        };
        let entries: Vec<HealthServiceEntry> = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                log::log_error("consul health response decode failed", &[("name", &name), ("error", &e)]);
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .map(entry_to_instance)
            .filter(|inst| filter.map(|f| f.matches(inst)).unwrap_or(true))
            .collect()
    }

    async fn get_instance(&self, id: &str) -> Option<Instance> {
        // Consul's health API is indexed by service name, not instance id;
        // a registrar always knows its own service name, but the generic
        // contract here has to search. Acceptable: get_instance is used far
        // less often than get_instances in this backend's intended usage.
        let url = format!("{}/v1/agent/services", self.config.address());
        let mut req = self.http.get(&url);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        let response = req.send().await.ok()?;
        let services: std::collections::HashMap<String, ConsulService> = response.json().await.ok()?;
        let service = services.get(id)?;
        Some(entry_to_instance(HealthServiceEntry {
            service: ConsulService {
                id: service.id.clone(),
                name: service.name.clone(),
                address: service.address.clone(),
                port: service.port,
                tags: service.tags.clone(),
                meta: service.meta.clone(),
            },
            checks: Vec::new(),
        }))
    }

    async fn get_all_services(&self) -> Vec<String> {
        let url = format!("{}/v1/catalog/services", self.config.address());
        let mut req = self.http.get(&url);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                log::log_error("consul catalog query failed", &[("error", &e)]);
                return Vec::new();
            }
        };
        let services: std::collections::HashMap<String, Vec<String>> = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                log::log_error("consul catalog decode failed", &[("error", &e)]);
                return Vec::new();
            }
        };
        services.into_keys().collect()
    }

    async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<(), BackendError> {
        let check = Self::check_id(id);
        let endpoint = match status {
            InstanceStatus::Up => "pass",
            InstanceStatus::Down => "fail",
            _ => "warn",
        };
        let url = format!("{}/v1/agent/check/{endpoint}/{check}", self.config.address());
        let mut req = self.http.put(&url);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        req.send()
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn cleanup(&self) {
        // No-op: Consul's TTL-check model handles expiration itself.
    }

    async fn close(&self) {
        self.ttl_timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_interval_rounds_up() {
        assert_eq!(renewal_interval(Duration::from_secs(30)), Duration::from_secs(20));
        assert_eq!(renewal_interval(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(renewal_interval(Duration::from_secs(3)), Duration::from_secs(2));
    }

    #[test]
    fn status_from_checks_critical_wins() {
        let checks = vec![
            ConsulCheck { status: "passing".into() },
            ConsulCheck { status: "critical".into() },
            ConsulCheck { status: "warning".into() },
        ];
        assert_eq!(status_from_checks(&checks), InstanceStatus::Down);
    }

    #[test]
    fn status_from_checks_warning_without_critical() {
        let checks = vec![
            ConsulCheck { status: "passing".into() },
            ConsulCheck { status: "warning".into() },
        ];
        assert_eq!(status_from_checks(&checks), InstanceStatus::Starting);
    }

    #[test]
    fn status_from_checks_all_passing_is_up() {
        let checks = vec![ConsulCheck { status: "passing".into() }];
        assert_eq!(status_from_checks(&checks), InstanceStatus::Up);
    }
}
