//! The canonical instance record, status enum, and filter predicate shared
//! by every backend and the discovery client.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wire protocol a service instance is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Grpc,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

/// Health/lifecycle status of an instance.
///
/// A `Down` instance is still enumerable from `getInstances` (I4); only
/// load-balancer strategies filter it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

/// An opaque metadata value. Most backends only need the `weight` key
/// (consumed by the weighted-round-robin strategy); everything else is
/// free-form and passed through untouched.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A registered service endpoint.
///
/// `id` is globally unique within a backend (I1): `name:host:port:registered_at_ms`
/// for self-registered instances, `name:ip:port` for platform-discovered ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    pub status: InstanceStatus,
    #[serde(default)]
    pub metadata: Metadata,
    /// Semantically a set; first occurrence of a tag wins on merge.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub zone: Option<String>,
    pub last_heartbeat: SystemTime,
    pub registered_at: SystemTime,
    #[serde(default)]
    pub health_check_path: Option<String>,
    #[serde(default)]
    pub health_check_interval: Option<std::time::Duration>,
}

impl Instance {
    /// Build the `name:host:port:registered-at-ms` id used by self-registered instances.
    pub fn self_registered_id(name: &str, host: &str, port: u16, registered_at: SystemTime) -> String {
        let ms = registered_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{name}:{host}:{port}:{ms}")
    }

    /// Build the `name:ip:port` id used by platform-discovered instances (Kubernetes).
    pub fn platform_id(name: &str, ip: &str, port: u16) -> String {
        format!("{name}:{ip}:{port}")
    }

    /// Base URL a caller should issue requests against: `protocol://host:port`.
    pub fn base_url(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Grpc => "grpc",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// The numeric weight recognized by the weighted-round-robin strategy.
    /// Non-numeric or negative weights, and a missing key, are treated as 1.
    pub fn weight(&self) -> u32 {
        match self.metadata.get("weight") {
            Some(serde_json::Value::Number(n)) => {
                let w = n.as_i64().unwrap_or(1);
                if w < 1 { 1 } else { w as u32 }
            }
            _ => 1,
        }
    }
}

/// Match predicate applied identically across backends and the discovery
/// client (spec §4.6): an instance matches iff every field present in the
/// filter equals the instance's corresponding field, with set-containment
/// for `tags` and equality per `metadata` key/value pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<InstanceStatus>,
    #[serde(default)]
    pub zone: Option<String>,
    /// Every tag listed here must appear in the instance's tags.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Filter {
    pub fn matches(&self, instance: &Instance) -> bool {
        if let Some(name) = &self.name
            && name != &instance.name
        {
            return false;
        }
        if let Some(status) = &self.status
            && status != &instance.status
        {
            return false;
        }
        if let Some(zone) = &self.zone
            && Some(zone) != instance.zone.as_ref()
        {
            return false;
        }
        if !self.tags.iter().all(|t| instance.tags.contains(t)) {
            return false;
        }
        for (k, v) in &self.metadata {
            if instance.metadata.get(k) != Some(v) {
                return false;
            }
        }
        true
    }
}
