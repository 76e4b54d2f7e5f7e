//! Service-invocation client (spec §4.5): per-call discovery, strategy
//! selection, and a bounded retry policy over transient failures only.
//! Grounded on the teacher's `BackendManager::call_tool` retry loop in
//! `src/backend/mod.rs` (fixed-delay retry with re-discovery on every
//! attempt), adapted from the teacher's escalating `RETRY_DELAYS` array to
//! this spec's fixed `retryDelay`.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};

use crate::balancer::LeastConnectionsStrategy;
use crate::config::ServiceClientConfig;
use crate::discovery::DiscoveryClient;
use crate::error::DiscoveryError;
use crate::instance::Instance;
use crate::log;

pub struct ServiceClient {
    config: ServiceClientConfig,
    discovery: Arc<DiscoveryClient>,
    http: reqwest::Client,
    least_connections: Arc<LeastConnectionsStrategy>,
}

impl ServiceClient {
    pub fn new(config: ServiceClientConfig, discovery: Arc<DiscoveryClient>, least_connections: Arc<LeastConnectionsStrategy>) -> Self {
        Self {
            config,
            discovery,
            http: reqwest::Client::new(),
            least_connections,
        }
    }

    /// Issue one request, transparently retrying per spec §4.5. `build`
    /// receives the chosen instance's base URL and returns the request to
    /// send; it is called again on every attempt, potentially against a
    /// different instance (spec §4.5: "re-discovery happens on every
    /// attempt... transient faults often localize to one node").
    pub async fn call<F>(&self, build: F) -> Result<reqwest::Response, DiscoveryError>
    where
        F: Fn(&str, Method) -> RequestBuilder,
    {
        let max_attempts = self.config.retries.max(1);
        let mut last_error: Option<DiscoveryError> = None;

        for attempt in 1..=max_attempts {
            let instance = self
                .discovery
                .get_instance(&self.config.service_name, &self.config.load_balancing_strategy, self.config.filter.as_ref())
                .await
                .map_err(|e| DiscoveryError::BackendTransient(anyhow::anyhow!(e)))?;

            let Some(instance) = instance else {
                // Terminal: exactly 1 attempt for NoInstances (P5).
                return Err(DiscoveryError::NoInstances {
                    service: self.config.service_name.clone(),
                });
            };

            let using_least_connections = self.config.load_balancing_strategy == "least-connections";
            if using_least_connections {
                self.least_connections.increment(&instance.id);
            }

            let outcome = self.attempt(&instance, &build).await;

            if using_least_connections {
                self.least_connections.decrement(&instance.id);
            }

            match outcome {
                Ok(response) => return Ok(response),
                Err(error) => {
                    let retryable = error.is_retryable() && attempt < max_attempts;
                    log::log_warn(
                        "service client attempt failed",
                        &[("service", &self.config.service_name), ("attempt", &attempt), ("retryable", &retryable)],
                    );
                    if !retryable {
                        return Err(error);
                    }
                    last_error = Some(error);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        Err(last_error.unwrap_or(DiscoveryError::NoInstances {
            service: self.config.service_name.clone(),
        }))
    }

    async fn attempt<F>(&self, instance: &Instance, build: &F) -> Result<reqwest::Response, DiscoveryError>
    where
        F: Fn(&str, Method) -> RequestBuilder,
    {
        let base_url = instance.base_url();
        let request = build(&base_url, Method::GET);
        let outcome = tokio::time::timeout(self.config.timeout, request.send()).await;

        match outcome {
            Ok(Ok(response)) if response.status().is_success() => Ok(response),
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                if matches!(status, 408 | 429 | 502 | 503 | 504) {
                    Err(DiscoveryError::TransportTransient(format!("status {status}")))
                } else {
                    Err(DiscoveryError::HttpTerminal { status })
                }
            }
            Ok(Err(e)) => Err(DiscoveryError::TransportTransient(e.to_string())),
            Err(_) => Err(DiscoveryError::TransportTransient("timeout".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::config::DiscoveryClientConfig;
    use crate::instance::{InstanceStatus, Protocol};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make(id: &str, name: &str, host: &str, port: u16) -> Instance {
        Instance {
            id: id.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            protocol: Protocol::Http,
            status: InstanceStatus::Up,
            metadata: Default::default(),
            tags: Vec::new(),
            zone: None,
            last_heartbeat: SystemTime::now(),
            registered_at: SystemTime::now(),
            health_check_path: None,
            health_check_interval: None,
        }
    }

    fn client_config(service_name: &str) -> ServiceClientConfig {
        ServiceClientConfig {
            service_name: service_name.to_string(),
            load_balancing_strategy: "round-robin".to_string(),
            filter: None,
            timeout: Duration::from_secs(2),
            retries: 3,
            retry_delay: Duration::from_millis(5),
        }
    }

    async fn setup(server: &MockServer) -> (ServiceClient, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let url = server.uri();
        let url = url.strip_prefix("http://").unwrap();
        let (host, port) = url.split_once(':').unwrap();
        backend.register(make("1", "svc", host, port.parse().unwrap())).await.unwrap();

        let discovery = DiscoveryClient::new(DiscoveryClientConfig::default(), backend.clone());
        let least_connections = discovery.least_connections();
        let client = ServiceClient::new(client_config("svc"), discovery, least_connections);
        (client, backend)
    }

    #[tokio::test]
    async fn retries_on_503_then_succeeds() {
        // End-to-end scenario 4.
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_: &wiremock::Request| {
                let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_string("ok")
                }
            })
            .mount(&server)
            .await;

        let (client, _backend) = setup(&server).await;
        let response = client
            .call(|base_url, method| reqwest::Client::new().request(method, format!("{base_url}/")))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_404_makes_exactly_one_attempt() {
        // End-to-end scenario 5.
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_: &wiremock::Request| {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(404)
            })
            .mount(&server)
            .await;

        let (client, _backend) = setup(&server).await;
        let err = client
            .call(|base_url, method| reqwest::Client::new().request(method, format!("{base_url}/")))
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::HttpTerminal { status: 404 }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_instances_is_terminal() {
        let backend: Arc<dyn crate::backend::Backend> = Arc::new(MemoryBackend::new());
        let discovery = DiscoveryClient::new(DiscoveryClientConfig::default(), backend);
        let least_connections = discovery.least_connections();
        let client = ServiceClient::new(client_config("missing"), discovery, least_connections);

        let err = client
            .call(|base_url, method| reqwest::Client::new().request(method, format!("{base_url}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoInstances { .. }));
    }
}
