//! Load-balancer strategies and factory (spec §4.3).

pub mod factory;
pub mod strategy;

pub use factory::{StrategyFactory, StrategyOptions, UnknownStrategyError};
pub use strategy::{
    IpHashStrategy, LeastConnectionsStrategy, LoadBalancingStrategy, RandomStrategy,
    RoundRobinStrategy, WeightedRoundRobinStrategy, ZoneAwareStrategy,
};
