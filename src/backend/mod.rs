//! Registry backend contract (spec §4.1): a uniform interface all four
//! concrete backends satisfy. Grounded on the teacher's `Backend`
//! `async_trait` in `src/backend/mod.rs` — same trait-object-over-DashMap
//! shape, generalized from "MCP tool backend" to "membership store".

pub mod consul;
pub mod error;
pub mod kubernetes;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::instance::{Filter, Instance, InstanceStatus};

pub use error::BackendError;

/// Uniform CRUD+heartbeat+list contract (spec §4.1).
///
/// Enumeration methods (`get_instances`, `get_instance`, `get_all_services`)
/// never propagate an error: on a transient backend failure they log via
/// [`crate::log`] and return an empty result, per the error-semantics
/// paragraph in spec §4.1. Mutation methods (`register`, `deregister`,
/// `update_status`) propagate fatal errors to the caller.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert or replace (I1: re-registering the same id overwrites).
    async fn register(&self, instance: Instance) -> Result<(), BackendError>;

    /// Remove; idempotent — a missing id is not an error.
    async fn deregister(&self, id: &str) -> Result<(), BackendError>;

    /// Bump `last_heartbeat` and set status UP. No-op if absent. Must not
    /// fail fatally on transient transport errors — implementations log
    /// and return rather than propagate.
    async fn heartbeat(&self, id: &str);

    /// All known instances of `name`, with `filter` applied. Empty on
    /// transient error or if `name` is unknown.
    async fn get_instances(&self, name: &str, filter: Option<&Filter>) -> Vec<Instance>;

    /// Single lookup. Absent is a sentinel (`None`), never an error.
    async fn get_instance(&self, id: &str) -> Option<Instance>;

    /// Every known service name.
    async fn get_all_services(&self) -> Vec<String>;

    /// Explicit status override.
    async fn update_status(&self, id: &str, status: InstanceStatus) -> Result<(), BackendError>;

    /// Remove expired entries. Idempotent; safe on any schedule.
    async fn cleanup(&self);

    /// Release all backend-owned resources (connections, timers).
    /// Idempotent. Default no-op for backends with nothing to release.
    async fn close(&self) {}
}
