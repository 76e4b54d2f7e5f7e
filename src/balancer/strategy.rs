//! Six pluggable selection strategies (spec §4.3). Grounded on the
//! `LoadBalancingStrategy` trait and per-strategy state in
//! `other_examples/22830a15_harborgrid-justin-rusty-db__src-networking-loadbalancer-mod.rs.rs`
//! (`Backend`/`LoadBalancer` shapes, atomic rotation cursor, connection
//! counters), generalized from that file's single-strategy `LoadBalancer`
//! into one trait with several implementations behind the factory in
//! `factory.rs`.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;

use crate::instance::{Instance, InstanceStatus};

fn healthy<'a>(instances: &'a [Instance]) -> Vec<&'a Instance> {
    instances.iter().filter(|i| i.status == InstanceStatus::Up).collect()
}

/// Picks one instance from a set, or `None` if no instance is healthy
/// (spec §4.3: "Every strategy MUST first filter to only UP instances").
pub trait LoadBalancingStrategy: Send + Sync {
    fn choose(&self, instances: &[Instance], key: Option<&str>) -> Option<Instance>;
}

/// Monotonic cursor modulo the healthy count, advanced after selection.
/// Not reset on membership change (spec §9 Open Questions: "selection may
/// briefly skew after membership change... the spec preserves this behavior").
#[derive(Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl LoadBalancingStrategy for RoundRobinStrategy {
    fn choose(&self, instances: &[Instance], _key: Option<&str>) -> Option<Instance> {
        let pool = healthy(instances);
        if pool.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % pool.len();
        Some(pool[idx].clone())
    }
}

/// Uniform random selection over healthy instances.
#[derive(Default)]
pub struct RandomStrategy;

impl LoadBalancingStrategy for RandomStrategy {
    fn choose(&self, instances: &[Instance], _key: Option<&str>) -> Option<Instance> {
        let pool = healthy(instances);
        if pool.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..pool.len());
        Some(pool[idx].clone())
    }
}

/// Active-connection counters, keyed by instance id. External callers
/// MUST bracket use with `increment`/`decrement` (spec §4.3); decrement
/// saturates at zero (P3).
#[derive(Default)]
pub struct LeastConnectionsStrategy {
    counters: DashMap<String, AtomicUsize>,
}

impl LeastConnectionsStrategy {
    pub fn increment(&self, id: &str) {
        self.counters
            .entry(id.to_string())
            .or_default()
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement(&self, id: &str) {
        if let Some(counter) = self.counters.get(id) {
            // Saturating decrement: never go below zero (P3).
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        }
    }

    pub fn count(&self, id: &str) -> usize {
        self.counters.get(id).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

impl LoadBalancingStrategy for LeastConnectionsStrategy {
    fn choose(&self, instances: &[Instance], _key: Option<&str>) -> Option<Instance> {
        let pool = healthy(instances);
        pool.into_iter()
            .min_by_key(|inst| self.count(&inst.id))
            .cloned()
    }
}

/// Builds a virtual sequence repeating each instance `max(1, weight)`
/// times, then rotates a cursor across it (spec §4.3).
#[derive(Default)]
pub struct WeightedRoundRobinStrategy {
    cursor: AtomicUsize,
}

impl LoadBalancingStrategy for WeightedRoundRobinStrategy {
    fn choose(&self, instances: &[Instance], _key: Option<&str>) -> Option<Instance> {
        let pool = healthy(instances);
        if pool.is_empty() {
            return None;
        }
        let virtual_seq: Vec<&Instance> = pool
            .iter()
            .flat_map(|inst| std::iter::repeat(*inst).take(inst.weight().max(1) as usize))
            .collect();
        if virtual_seq.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % virtual_seq.len();
        Some(virtual_seq[idx].clone())
    }
}

/// Standard 32-bit string hash: Java's `String.hashCode` recurrence
/// (`h = 31*h + c`), chosen as "a standard 32-bit string hash" per spec
/// §4.3 without specifying which; this one is ubiquitous and
/// deterministic across runs, which IPHash requires.
fn string_hash_32(s: &str) -> u32 {
    let mut h: u32 = 0;
    for c in s.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as u32);
    }
    h
}

/// Deterministic pick by hashing a caller-supplied key modulo healthy
/// count. With no key, returns the first healthy instance (spec §4.3).
#[derive(Default)]
pub struct IpHashStrategy;

impl LoadBalancingStrategy for IpHashStrategy {
    fn choose(&self, instances: &[Instance], key: Option<&str>) -> Option<Instance> {
        let pool = healthy(instances);
        if pool.is_empty() {
            return None;
        }
        match key {
            Some(k) => {
                let idx = (string_hash_32(k) as usize) % pool.len();
                Some(pool[idx].clone())
            }
            None => Some(pool[0].clone()),
        }
    }
}

/// If a preferred zone is configured and matched by any healthy instance,
/// picks uniformly within that zone; otherwise uniformly across all
/// healthy instances (spec §4.3).
pub struct ZoneAwareStrategy {
    zone: Option<String>,
}

impl ZoneAwareStrategy {
    pub fn new(zone: Option<String>) -> Self {
        Self { zone }
    }
}

impl LoadBalancingStrategy for ZoneAwareStrategy {
    fn choose(&self, instances: &[Instance], _key: Option<&str>) -> Option<Instance> {
        let pool = healthy(instances);
        if pool.is_empty() {
            return None;
        }
        let zone_pool: Vec<&Instance> = match &self.zone {
            Some(z) => pool
                .iter()
                .filter(|i| i.zone.as_deref() == Some(z.as_str()))
                .copied()
                .collect(),
            None => Vec::new(),
        };
        let chosen = if zone_pool.is_empty() { &pool } else { &zone_pool };
        let idx = rand::thread_rng().gen_range(0..chosen.len());
        Some(chosen[idx].clone())
    }
}
