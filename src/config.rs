//! Broker configuration.
//!
//! Plain option structs with serviceable defaults; construct with struct
//! update syntax (`BrokerOptions { metrics: true, ..Default::default() }`).
//! Logging is the host's concern: the crate emits `tracing` events and the
//! embedding application installs whatever subscriber it wants.

use std::time::Duration;

/// Endpoint selection strategy used by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Advance a per-action cursor modulo the endpoint count.
    #[default]
    RoundRobin,
    /// Uniform random pick among selectable endpoints.
    Random,
}

/// Registry behavior knobs.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub strategy: Strategy,
    /// Prefer a local endpoint over remote ones when both exist.
    pub prefer_local: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self { strategy: Strategy::RoundRobin, prefer_local: true }
    }
}

/// Per-endpoint circuit breaker knobs.
#[derive(Debug, Clone)]
pub struct CircuitBreakerOptions {
    pub enabled: bool,
    /// Consecutive counted failures before the breaker opens.
    pub max_failures: u32,
    /// How long an open breaker waits before admitting a probe call.
    pub half_open_time: Duration,
    /// Count request timeouts as breaker failures.
    pub failure_on_timeout: bool,
    /// Count rejections with code ≥ 500 as breaker failures.
    pub failure_on_reject: bool,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_failures: 5,
            half_open_time: Duration::from_secs(10),
            failure_on_timeout: true,
            failure_on_reject: true,
        }
    }
}

/// Top-level broker options.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Cluster-unique node identifier. Defaults to the lowercased hostname
    /// when the environment exposes one, else `node-<pid>`.
    pub node_id: String,
    /// Default per-call timeout; `Duration::ZERO` disables it.
    pub request_timeout: Duration,
    /// Default retry budget for retryable failures.
    pub request_retry: u32,
    /// Maximum context nesting depth; 0 = unlimited.
    pub max_call_level: u32,
    /// How often HEARTBEAT frames are published.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is treated as disconnected.
    pub heartbeat_timeout: Duration,
    pub registry: RegistryOptions,
    pub circuit_breaker: CircuitBreakerOptions,
    /// Emit trace-span events for sampled calls.
    pub metrics: bool,
    /// Deterministic sampling rate in [0, 1].
    pub metrics_rate: f64,
    /// Collect per-action request statistics (exposed via `$node.stats`).
    pub statistics: bool,
    /// Register the `$node.*` introspection actions.
    pub internal_actions: bool,
    /// Validate action params against their schemas before dispatch.
    pub validation: bool,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            request_timeout: Duration::ZERO,
            request_retry: 0,
            max_call_level: 0,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            registry: RegistryOptions::default(),
            circuit_breaker: CircuitBreakerOptions::default(),
            metrics: false,
            metrics_rate: 1.0,
            statistics: false,
            internal_actions: true,
            validation: true,
        }
    }
}

fn default_node_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .map(|h| h.trim().to_lowercase())
        .unwrap_or_else(|| format!("node-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = BrokerOptions::default();
        assert!(!opts.node_id.is_empty());
        assert_eq!(opts.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(opts.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(opts.request_retry, 0);
        assert_eq!(opts.max_call_level, 0);
        assert!(opts.registry.prefer_local);
        assert_eq!(opts.registry.strategy, Strategy::RoundRobin);
        assert!(!opts.circuit_breaker.enabled);
        assert_eq!(opts.circuit_breaker.max_failures, 5);
        assert!(opts.internal_actions);
        assert!(opts.validation);
        assert!(!opts.statistics);
        assert_eq!(opts.metrics_rate, 1.0);
    }
}
