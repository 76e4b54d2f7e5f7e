//! Cross-module scenarios exercising the registrar, discovery client,
//! balancer, and service client together rather than in isolation.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::backend::consul::ConsulBackend;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::Backend;
    use crate::config::{ConsulBackendConfig, DiscoveryClientConfig, ServiceClientConfig};
    use crate::discovery::DiscoveryClient;
    use crate::client::ServiceClient;
    use crate::instance::{Filter, Instance, InstanceStatus, Protocol};

    fn make(id: &str, name: &str, host: &str, port: u16, zone: Option<&str>) -> Instance {
        Instance {
            id: id.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            protocol: Protocol::Http,
            status: InstanceStatus::Up,
            metadata: Default::default(),
            tags: Vec::new(),
            zone: zone.map(str::to_string),
            last_heartbeat: std::time::SystemTime::now(),
            registered_at: std::time::SystemTime::now(),
            health_check_path: None,
            health_check_interval: None,
        }
    }

    #[tokio::test]
    async fn scenario_1_round_robin_cycles_across_three_instances() {
        let backend = Arc::new(MemoryBackend::new());
        for i in 1..=3 {
            backend
                .register(make(&i.to_string(), "svc", "127.0.0.1", 8000 + i, None))
                .await
                .unwrap();
        }
        let discovery = DiscoveryClient::new(DiscoveryClientConfig::default(), backend);

        let mut picks = Vec::new();
        for _ in 0..6 {
            let picked = discovery.get_instance("svc", "round-robin", None).await.unwrap().unwrap();
            picks.push(picked.id);
        }
        assert_eq!(picks, vec!["1", "2", "3", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn scenario_2_zone_filter_selects_only_the_matching_instance() {
        let backend = Arc::new(MemoryBackend::new());
        backend.register(make("1", "svc", "127.0.0.1", 8001, Some("us-east-1"))).await.unwrap();
        backend.register(make("2", "svc", "127.0.0.1", 8002, Some("us-west-1"))).await.unwrap();

        let discovery = DiscoveryClient::new(DiscoveryClientConfig::default(), backend);
        let filter = Filter {
            zone: Some("us-east-1".to_string()),
            ..Default::default()
        };
        let matched = discovery.get_instances("svc", Some(&filter)).await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "1");
    }

    #[tokio::test]
    async fn scenario_3_weighted_round_robin_skews_toward_higher_weight() {
        let backend = Arc::new(MemoryBackend::new());
        let mut heavy = make("1", "svc", "127.0.0.1", 8001, None);
        heavy.metadata.insert("weight".to_string(), serde_json::json!(3));
        backend.register(heavy).await.unwrap();
        backend.register(make("2", "svc", "127.0.0.1", 8002, None)).await.unwrap();

        let discovery = DiscoveryClient::new(DiscoveryClientConfig::default(), backend);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..8 {
            let picked = discovery.get_instance("svc", "weighted-round-robin", None).await.unwrap().unwrap();
            *counts.entry(picked.id).or_insert(0) += 1;
        }
        assert!(counts.get("1").copied().unwrap_or(0) > counts.get("2").copied().unwrap_or(0));
    }

    #[tokio::test]
    async fn scenario_4_service_client_retries_transient_failures_then_succeeds() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_: &wiremock::Request| {
                let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&server)
            .await;

        let backend = Arc::new(MemoryBackend::new());
        let url = server.uri();
        let url = url.strip_prefix("http://").unwrap();
        let (host, port) = url.split_once(':').unwrap();
        backend.register(make("1", "svc", host, port.parse().unwrap(), None)).await.unwrap();

        let discovery = DiscoveryClient::new(DiscoveryClientConfig::default(), backend);
        let least_connections = discovery.least_connections();
        let client = ServiceClient::new(
            ServiceClientConfig {
                service_name: "svc".to_string(),
                load_balancing_strategy: "round-robin".to_string(),
                filter: None,
                timeout: Duration::from_secs(2),
                retries: 3,
                retry_delay: Duration::from_millis(5),
            },
            discovery,
            least_connections,
        );

        let response = client
            .call(|base_url, m| reqwest::Client::new().request(m, format!("{base_url}/")))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn scenario_6_consul_backend_renews_its_ttl_check_within_the_renewal_window() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/register"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let pass_hits = Arc::new(AtomicUsize::new(0));
        let pass_hits_clone = pass_hits.clone();
        Mock::given(method("PUT"))
            .and(path("/v1/agent/check/pass/service:1"))
            .respond_with(move |_: &wiremock::Request| {
                pass_hits_clone.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200)
            })
            .mount(&server)
            .await;

        let uri = server.uri();
        let uri = uri.strip_prefix("http://").unwrap();
        let (host, port) = uri.split_once(':').unwrap();
        let backend = ConsulBackend::new(ConsulBackendConfig {
            ttl: "1s".to_string(),
            host: host.to_string(),
            port: port.parse().unwrap(),
            ..Default::default()
        });
        backend
            .register(make("1", "svc", "127.0.0.1", 8080, None))
            .await
            .unwrap();

        // renewal_interval(1s) = ceil(2/3) = 1s; give it two ticks of room.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(pass_hits.load(Ordering::SeqCst) >= 1);

        backend.close().await;
    }
}
