//! Service discovery and client-side load balancing for microservices.
//!
//! Four pieces compose into a complete discovery stack:
//!
//! - [`backend`]: the membership store ([`backend::Backend`]), with
//!   in-memory, Redis, Consul, and Kubernetes implementations.
//! - [`registrar`]: announces a local instance, probes its own health, and
//!   heartbeats it ([`registrar::ServiceRegistrar`]).
//! - [`discovery`]: a cached read path over a backend
//!   ([`discovery::DiscoveryClient`]).
//! - [`balancer`] + [`client`]: strategy selection and a retrying HTTP
//!   client over discovered instances ([`client::ServiceClient`]).
//!
//! [`config`] holds the validated configuration for each of the above;
//! [`instance`] holds the shared `Instance`/`Filter` types; [`error`] holds
//! the error taxonomy surfaced to foreground callers; [`log`] and [`timer`]
//! are the ambient logging and background-task plumbing every other module
//! builds on.

pub mod backend;
pub mod balancer;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod instance;
pub mod log;
pub mod registrar;
pub mod timer;

#[cfg(test)]
mod tests_e2e;

pub use backend::{Backend, BackendError};
pub use balancer::{
    IpHashStrategy, LeastConnectionsStrategy, LoadBalancingStrategy, RandomStrategy,
    RoundRobinStrategy, StrategyFactory, StrategyOptions, UnknownStrategyError,
    WeightedRoundRobinStrategy, ZoneAwareStrategy,
};
pub use client::ServiceClient;
pub use config::{
    ConfigValidationError, ConsulBackendConfig, DiscoveryClientConfig, KubernetesBackendConfig,
    RedisBackendConfig, RegistrarConfig, ServiceClientConfig,
};
pub use discovery::DiscoveryClient;
pub use error::DiscoveryError;
pub use instance::{Filter, Instance, InstanceStatus, Metadata, Protocol};
pub use registrar::ServiceRegistrar;
