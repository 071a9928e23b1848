//! Service registry: action name → endpoints, plus the node catalog.
//!
//! The registry is written by local service registration, by INFO-driven
//! remote registration, and by disconnect-driven bulk deregistration; all of
//! them serialize on one mutex with the selection cursor reads. Breaker
//! state lives in per-endpoint atomics and needs no registry lock.
//!
//! Registration fires a local `register.action.<name>` event through the
//! broker for BOTH local and remote endpoints; the payload's `nodeID` field
//! is the only way to tell them apart.

mod action_map;
mod endpoint;
mod nodes;

pub use action_map::ActionMap;
pub use endpoint::{CircuitBreaker, CircuitState, Endpoint};
pub use nodes::{ActionInfo, NodeCatalog, NodeInfo, ServiceInfo};

use crate::clock::Clock;
use crate::config::{CircuitBreakerOptions, RegistryOptions};
use crate::service::ActionHandler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What the registry needs to know about an action being registered.
#[derive(Clone)]
pub struct RegisteredAction {
    /// Fully qualified name (`"service.method"`).
    pub name: String,
    pub cache: bool,
    /// Wrapped handler for local registrations; `None` for remote ones.
    pub handler: Option<ActionHandler>,
}

/// Introspection filter for [`ServiceRegistry::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    pub only_local: bool,
    pub only_available: bool,
    pub skip_internal: bool,
}

/// Introspection row returned by [`ServiceRegistry::list`].
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub action: String,
    pub node_id: String,
    pub local: bool,
    pub state: CircuitState,
}

pub struct ServiceRegistry {
    local_node_id: String,
    options: RegistryOptions,
    breaker: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
    actions: Mutex<HashMap<String, ActionMap>>,
}

impl ServiceRegistry {
    pub fn new(
        local_node_id: impl Into<String>,
        options: RegistryOptions,
        breaker: CircuitBreakerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            options,
            breaker,
            clock,
            actions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// Add an endpoint for `action`. `node_id = None` denotes the local
    /// node. Returns true when the endpoint is new.
    pub fn register(&self, node_id: Option<&str>, action: RegisteredAction) -> bool {
        let local = node_id.is_none();
        let node_id = node_id.unwrap_or(&self.local_node_id).to_string();
        let endpoint = Arc::new(Endpoint {
            node_id: node_id.clone(),
            action: action.name.clone(),
            local,
            cache: action.cache,
            handler: action.handler,
            breaker: CircuitBreaker::new(
                self.breaker.max_failures,
                self.breaker.half_open_time,
                self.clock.clone(),
            ),
        });

        let added = self
            .lock()
            .entry(action.name.clone())
            .or_default()
            .add(endpoint);
        if added {
            tracing::debug!(action = %action.name, node = %node_id, local, "endpoint registered");
        }
        added
    }

    /// Remove the endpoint for `action` on the given node (`None` = local).
    /// Drops the whole action entry when it becomes empty.
    pub fn deregister(&self, node_id: Option<&str>, action: &str) -> bool {
        let node_id = node_id.unwrap_or(&self.local_node_id);
        let mut actions = self.lock();
        let Some(map) = actions.get_mut(action) else {
            return false;
        };
        let removed = map.remove(node_id);
        if map.is_empty() {
            actions.remove(action);
        }
        if removed {
            tracing::debug!(action, node = %node_id, "endpoint deregistered");
        }
        removed
    }

    /// Remove every endpoint hosted on `node_id`. Returns the affected
    /// action names.
    pub fn deregister_node(&self, node_id: &str) -> Vec<String> {
        let mut actions = self.lock();
        let mut removed = Vec::new();
        actions.retain(|name, map| {
            if map.remove(node_id) {
                removed.push(name.clone());
            }
            !map.is_empty()
        });
        if !removed.is_empty() {
            tracing::info!(node = %node_id, count = removed.len(), "endpoints deregistered");
        }
        removed
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.lock().contains_key(action)
    }

    /// Resolve an endpoint for a call.
    ///
    /// With `prefer_node` the endpoint on that node is returned regardless
    /// of breaker state (the pipeline gate handles open breakers), or `None`
    /// when the node does not expose the action. Otherwise the selection
    /// policy applies: local preference, configured strategy over
    /// selectable endpoints, half-open recovery probe as a last resort.
    pub fn find_endpoint(
        &self,
        action: &str,
        prefer_node: Option<&str>,
    ) -> Option<Arc<Endpoint>> {
        let mut actions = self.lock();
        let map = actions.get_mut(action)?;
        match prefer_node {
            Some(node) => map.get_by_node(node),
            None => map.select(self.options.strategy, self.options.prefer_local),
        }
    }

    pub fn list(&self, filter: ListFilter) -> Vec<EndpointSnapshot> {
        let actions = self.lock();
        let mut rows: Vec<EndpointSnapshot> = actions
            .iter()
            .filter(|(name, _)| !(filter.skip_internal && name.starts_with('$')))
            .flat_map(|(name, map)| {
                map.endpoints().iter().map(move |endpoint| EndpointSnapshot {
                    action: name.clone(),
                    node_id: endpoint.node_id.clone(),
                    local: endpoint.is_local(),
                    state: endpoint.breaker.state(),
                })
            })
            .filter(|row| !(filter.only_local && !row.local))
            .filter(|row| !(filter.only_available && row.state == CircuitState::Open))
            .collect();
        rows.sort_by(|a, b| a.action.cmp(&b.action).then(a.node_id.cmp(&b.node_id)));
        rows
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActionMap>> {
        self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("local_node_id", &self.local_node_id)
            .field("actions", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Strategy;

    fn registry() -> (ServiceRegistry, ManualClock) {
        let clock = ManualClock::new();
        let registry = ServiceRegistry::new(
            "local-node",
            RegistryOptions { strategy: Strategy::RoundRobin, prefer_local: true },
            CircuitBreakerOptions {
                enabled: true,
                max_failures: 1,
                half_open_time: std::time::Duration::from_millis(500),
                ..Default::default()
            },
            Arc::new(clock.clone()),
        );
        (registry, clock)
    }

    fn action(name: &str) -> RegisteredAction {
        RegisteredAction { name: name.to_string(), cache: false, handler: None }
    }

    #[test]
    fn register_is_idempotent_per_node() {
        let (registry, _clock) = registry();
        assert!(registry.register(None, action("posts.find")));
        assert!(!registry.register(None, action("posts.find")));
        assert!(registry.register(Some("n2"), action("posts.find")));
        assert!(registry.has_action("posts.find"));
    }

    #[test]
    fn has_action_iff_endpoints_remain() {
        let (registry, _clock) = registry();
        registry.register(None, action("posts.find"));
        registry.register(Some("n2"), action("posts.find"));

        assert!(registry.deregister(None, "posts.find"));
        assert!(registry.has_action("posts.find"));
        assert!(registry.deregister(Some("n2"), "posts.find"));
        assert!(!registry.has_action("posts.find"));
        assert!(!registry.deregister(Some("n2"), "posts.find"));
    }

    #[test]
    fn unknown_action_resolves_to_none() {
        let (registry, _clock) = registry();
        assert!(registry.find_endpoint("ghost.action", None).is_none());
    }

    #[test]
    fn prefer_node_pins_the_endpoint_or_fails() {
        let (registry, _clock) = registry();
        registry.register(Some("n2"), action("user.create"));
        registry.register(Some("n3"), action("user.create"));

        let pinned = registry.find_endpoint("user.create", Some("n3")).unwrap();
        assert_eq!(pinned.node_id, "n3");
        assert!(registry.find_endpoint("user.create", Some("n9")).is_none());
    }

    #[test]
    fn local_endpoint_wins_under_prefer_local() {
        let (registry, _clock) = registry();
        registry.register(Some("n2"), action("posts.find"));
        registry.register(None, action("posts.find"));

        let picked = registry.find_endpoint("posts.find", None).unwrap();
        assert!(picked.is_local());
        assert_eq!(picked.node_id, "local-node");
    }

    #[test]
    fn deregister_node_sweeps_every_action() {
        let (registry, _clock) = registry();
        registry.register(Some("n2"), action("a.one"));
        registry.register(Some("n2"), action("a.two"));
        registry.register(Some("n3"), action("a.two"));

        let mut removed = registry.deregister_node("n2");
        removed.sort();
        assert_eq!(removed, vec!["a.one".to_string(), "a.two".to_string()]);
        assert!(!registry.has_action("a.one"));
        assert!(registry.has_action("a.two"));
    }

    #[test]
    fn open_breaker_recovers_through_probe() {
        let (registry, clock) = registry();
        registry.register(Some("n2"), action("posts.find"));
        let endpoint = registry.find_endpoint("posts.find", None).unwrap();
        endpoint.breaker.failure();

        assert!(registry.find_endpoint("posts.find", None).is_none());
        clock.advance(500);
        let probe = registry.find_endpoint("posts.find", None).unwrap();
        assert_eq!(probe.breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn list_filters_internal_and_remote() {
        let (registry, _clock) = registry();
        registry.register(None, action("$node.list"));
        registry.register(None, action("posts.find"));
        registry.register(Some("n2"), action("posts.find"));

        let all = registry.list(ListFilter::default());
        assert_eq!(all.len(), 3);
        let local_only =
            registry.list(ListFilter { only_local: true, skip_internal: true, ..Default::default() });
        assert_eq!(local_only.len(), 1);
        assert_eq!(local_only[0].action, "posts.find");
    }
}
