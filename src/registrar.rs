//! Service registrar (spec §4.2): announces a local instance, runs a
//! periodic health probe, sends heartbeats, and guarantees clean
//! deregistration. Grounded on the teacher's `BackendManager` lifecycle
//! (`start_backend`/`stop_all`) in `src/backend/mod.rs` for the
//! register/running/stopping state shape, and on `run_health_checker` in
//! `src/backend/health.rs` for the probe-then-classify loop body.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;

use crate::backend::Backend;
use crate::config::RegistrarConfig;
use crate::error::DiscoveryError;
use crate::instance::{Instance, InstanceStatus};
use crate::log;
use crate::timer::PeriodicTask;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort "first non-internal IPv4" detection: opens a UDP socket
/// toward a public address (no packet is actually sent) and reads back the
/// local address the OS would route through. Falls back to `localhost`.
fn detect_host() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

struct Registered {
    id: String,
    heartbeat_timer: PeriodicTask,
    cleanup_timer: PeriodicTask,
}

pub struct ServiceRegistrar {
    config: RegistrarConfig,
    backend: Arc<dyn Backend>,
    http: reqwest::Client,
    registered: RwLock<Option<Registered>>,
}

impl ServiceRegistrar {
    pub fn new(config: RegistrarConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            http: reqwest::Client::new(),
            registered: RwLock::new(None),
        }
    }

    pub async fn instance_id(&self) -> Option<String> {
        self.registered.read().await.as_ref().map(|r| r.id.clone())
    }

    /// Builds the local instance, writes it as STARTING, starts the
    /// heartbeat and cleanup timers, then runs one synchronous health probe.
    pub async fn register(&self) -> Result<(), DiscoveryError> {
        self.config.validate()?;

        let host = self.config.host.clone().unwrap_or_else(detect_host);
        let registered_at = SystemTime::now();
        let id = Instance::self_registered_id(&self.config.name, &host, self.config.port as u16, registered_at);

        let instance = Instance {
            id: id.clone(),
            name: self.config.name.clone(),
            host,
            port: self.config.port as u16,
            protocol: self.config.protocol,
            status: InstanceStatus::Starting,
            metadata: self.config.metadata.clone(),
            tags: self.config.tags.clone(),
            zone: self.config.zone.clone(),
            last_heartbeat: registered_at,
            registered_at,
            health_check_path: self.config.health_check_path.clone(),
            health_check_interval: self.config.health_check_interval,
        };

        self.backend.register(instance).await?;

        let base_url = Self::base_url_for(self.config.protocol, &host, self.config.port as u16);
        let path = self.config.default_health_check_path().to_string();

        let heartbeat_interval = self.config.health_check_interval_or_default();
        let backend_for_heartbeat = Arc::clone(&self.backend);
        let http_for_heartbeat = self.http.clone();
        let id_for_heartbeat = id.clone();
        let base_url_for_heartbeat = base_url.clone();
        let path_for_heartbeat = path.clone();

        let heartbeat_timer = PeriodicTask::start(heartbeat_interval, move || {
            let backend = Arc::clone(&backend_for_heartbeat);
            let http = http_for_heartbeat.clone();
            let id = id_for_heartbeat.clone();
            let base_url = base_url_for_heartbeat.clone();
            let path = path_for_heartbeat.clone();
            async move {
                Self::probe_and_update(&http, &backend, &id, &base_url, &path).await;
            }
        });

        let backend_for_cleanup = Arc::clone(&self.backend);
        let cleanup_timer = PeriodicTask::start(CLEANUP_INTERVAL, move || {
            let backend = Arc::clone(&backend_for_cleanup);
            async move {
                backend.cleanup().await;
            }
        });

        *self.registered.write().await = Some(Registered {
            id: id.clone(),
            heartbeat_timer,
            cleanup_timer,
        });

        Self::probe_and_update(&self.http, &self.backend, &id, &base_url, &path).await;

        Ok(())
    }

    fn base_url_for(protocol: crate::instance::Protocol, host: &str, port: u16) -> String {
        let scheme = match protocol {
            crate::instance::Protocol::Http => "http",
            crate::instance::Protocol::Https => "https",
            crate::instance::Protocol::Grpc => "grpc",
        };
        format!("{scheme}://{host}:{port}")
    }

    /// GET `{base_url}{path}` with a 5s timeout. 200 -> UP + backend
    /// heartbeat; anything else -> DOWN + `updateStatus`. Never propagates
    /// (spec §4.2: "a failed probe NEVER throws; it toggles status and logs
    /// at warn").
    async fn probe_and_update(http: &reqwest::Client, backend: &Arc<dyn Backend>, id: &str, base_url: &str, path: &str) {
        let url = format!("{base_url}{path}");
        let outcome = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, http.get(&url).send()).await;

        match outcome {
            Ok(Ok(response)) if response.status().is_success() => {
                backend.heartbeat(id).await;
                return;
            }
            Ok(Ok(response)) => {
                log::log_warn(
                    "health probe returned non-2xx",
                    &[("id", &id), ("status", &response.status().as_u16())],
                );
            }
            Ok(Err(e)) => {
                log::log_warn("health probe transport error", &[("id", &id), ("error", &e)]);
            }
            Err(_) => {
                log::log_warn("health probe timed out", &[("id", &id)]);
            }
        }

        if let Err(e) = backend.update_status(id, InstanceStatus::Down).await {
            log::log_error("updateStatus after failed probe failed", &[("id", &id), ("error", &e)]);
        }
    }

    /// Stops both timers, deregisters from the backend, clears local state.
    /// Idempotent: a second call on an unregistered instance is a no-op.
    pub async fn deregister(&self) -> Result<(), DiscoveryError> {
        let mut guard = self.registered.write().await;
        let Some(mut registered) = guard.take() else {
            return Ok(());
        };
        registered.heartbeat_timer.stop().await;
        registered.cleanup_timer.stop().await;
        self.backend.deregister(&registered.id).await?;
        Ok(())
    }
}
