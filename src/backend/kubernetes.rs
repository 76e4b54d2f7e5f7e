//! Read-only registry backend backed by Kubernetes `Endpoints` (spec
//! §4.1.4). Grounded on
//! `other_examples/7512fc35_benjaminabbitt-angzarr__src-discovery-k8s.rs.rs`
//! for the `kube::Client`/`Api<T>`/`ListParams` usage shape, adapted from
//! that file's `Service`-plus-annotations model to this spec's
//! `Endpoints`-subset model.

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::{Api, ListParams};
use tokio::sync::OnceCell;

use super::{Backend, BackendError};
use crate::config::KubernetesBackendConfig;
use crate::instance::{Filter, Instance, InstanceStatus, Protocol};
use crate::log;

const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
const ZONE_LABEL_FALLBACK: &str = "failure-domain.beta.kubernetes.io/zone";

pub struct KubernetesBackend {
    config: KubernetesBackendConfig,
    client: OnceCell<kube::Client>,
}

impl KubernetesBackend {
    pub fn new(config: KubernetesBackendConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&kube::Client, BackendError> {
        self.client
            .get_or_try_init(|| async { kube::Client::try_default().await })
            .await
            .map_err(|e| BackendError::Other(anyhow::anyhow!(e)))
    }

    fn zone_of(labels: &std::collections::BTreeMap<String, String>) -> Option<String> {
        labels
            .get(ZONE_LABEL)
            .or_else(|| labels.get(ZONE_LABEL_FALLBACK))
            .cloned()
    }

    fn instances_from_endpoints(name: &str, endpoints: &Endpoints) -> Vec<Instance> {
        let zone = endpoints
            .metadata
            .labels
            .as_ref()
            .and_then(Self::zone_of);
        let now = std::time::SystemTime::now();

        let mut instances = Vec::new();
        for subset in endpoints.subsets.iter().flatten() {
            let ports: Vec<u16> = subset
                .ports
                .iter()
                .flatten()
                .map(|p| p.port as u16)
                .collect();
            let ports = if ports.is_empty() { vec![0] } else { ports };

            for (addresses, status) in [
                (subset.addresses.as_deref().unwrap_or(&[]), InstanceStatus::Up),
                (
                    subset.not_ready_addresses.as_deref().unwrap_or(&[]),
                    InstanceStatus::Starting,
                ),
            ] {
                for address in addresses {
                    for &port in &ports {
                        instances.push(Instance {
                            id: Instance::platform_id(name, &address.ip, port),
                            name: name.to_string(),
                            host: address.ip.clone(),
                            port,
                            protocol: Protocol::Http,
                            status,
                            metadata: Default::default(),
                            tags: Vec::new(),
                            zone: zone.clone(),
                            last_heartbeat: now,
                            registered_at: now,
                            health_check_path: None,
                            health_check_interval: None,
                        });
                    }
                }
            }
        }
        instances
    }
}

#[async_trait::async_trait]
impl Backend for KubernetesBackend {
    /// No-op: the platform owns lifecycle (spec §4.1.4).
    async fn register(&self, _instance: Instance) -> Result<(), BackendError> {
        Ok(())
    }

    async fn deregister(&self, _id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn heartbeat(&self, _id: &str) {}

    async fn get_instances(&self, name: &str, filter: Option<&Filter>) -> Vec<Instance> {
        let client = match self.client().await {
            Ok(c) => c.clone(),
            Err(e) => {
                log::log_error("kubernetes client init failed", &[("name", &name), ("error", &e)]);
                return Vec::new();
            }
        };
        let api: Api<Endpoints> = Api::namespaced(client, &self.config.namespace);
        let endpoints = match api.get(name).await {
            Ok(e) => e,
            Err(e) => {
                log::log_error("kubernetes Endpoints read failed", &[("name", &name), ("error", &e)]);
                return Vec::new();
            }
        };
        Self::instances_from_endpoints(name, &endpoints)
            .into_iter()
            .filter(|inst| filter.map(|f| f.matches(inst)).unwrap_or(true))
            .collect()
    }

    async fn get_instance(&self, _id: &str) -> Option<Instance> {
        // Endpoints are keyed by service name, not instance id; this
        // backend's intended entry point is get_instances/get_all_services.
        None
    }

    async fn get_all_services(&self) -> Vec<String> {
        let client = match self.client().await {
            Ok(c) => c.clone(),
            Err(e) => {
                log::log_error("kubernetes client init failed", &[("error", &e)]);
                return Vec::new();
            }
        };
        let api: Api<Service> = Api::namespaced(client, &self.config.namespace);
        let lp = ListParams::default().labels(&self.config.label_selector);
        match api.list(&lp).await {
            Ok(list) => list
                .items
                .into_iter()
                // Preserve observed behavior (spec §9 Open Questions): services
                // lacking `metadata.name` contribute an empty string rather
                // than being filtered out.
                .map(|svc| svc.metadata.name.unwrap_or_default())
                .collect(),
            Err(e) => {
                log::log_error("kubernetes Service list failed", &[("error", &e)]);
                Vec::new()
            }
        }
    }

    /// No-op: the platform owns lifecycle.
    async fn update_status(&self, _id: &str, _status: InstanceStatus) -> Result<(), BackendError> {
        Ok(())
    }

    /// No-op: the platform owns expiration.
    async fn cleanup(&self) {}
}
