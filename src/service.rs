//! Service definitions: named bundles of actions, event subscriptions, and
//! lifecycle hooks hosted on exactly one node.
//!
//! Definitions are built with an explicit typed builder. Variants of a base
//! service are produced with [`ServiceDefinition::merge`] and a
//! [`ServiceOverlay`]: settings deep-merge (arrays are replaced wholesale),
//! actions and events shallow-merge with the overlay winning per key, and
//! name, version, and each lifecycle hook are wholly overridden when the
//! overlay provides them.

use crate::context::Context;
use crate::error::BrokerError;
use crate::event_bus::EventHandler;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub type ActionResult = Result<Value, BrokerError>;

/// Boxed async action handler. Use [`action_handler`] to build one from a
/// plain async closure.
pub type ActionHandler = Arc<dyn Fn(Context) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// Async lifecycle hook (`started` / `stopped`).
pub type LifecycleHook =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), BrokerError>> + Send + Sync>;

/// Synchronous hook run when the service is registered.
pub type CreatedHook = Arc<dyn Fn() + Send + Sync>;

/// Wrap an async closure into an [`ActionHandler`].
pub fn action_handler<F, Fut>(f: F) -> ActionHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap an async closure into a [`LifecycleHook`].
pub fn lifecycle_hook<F, Fut>(f: F) -> LifecycleHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BrokerError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// One callable operation of a service.
#[derive(Clone)]
pub struct ActionDefinition {
    /// Short name; the registered name is `<service full name>.<name>`.
    pub name: String,
    /// Cacheable through the broker's cacher.
    pub cache: bool,
    /// Optional JSON Schema for params validation.
    pub params: Option<Value>,
    pub handler: ActionHandler,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, handler: ActionHandler) -> Self {
        Self { name: name.into(), cache: false, params: None, handler }
    }

    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    pub fn params(mut self, schema: Value) -> Self {
        self.params = Some(schema);
        self
    }
}

impl std::fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .field("params", &self.params.is_some())
            .finish()
    }
}

/// A service hosted by a broker.
#[derive(Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub version: Option<u32>,
    pub settings: Value,
    pub actions: BTreeMap<String, ActionDefinition>,
    pub events: BTreeMap<String, EventHandler>,
    pub created: Option<CreatedHook>,
    pub started: Option<LifecycleHook>,
    pub stopped: Option<LifecycleHook>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            settings: Value::Object(Map::new()),
            actions: BTreeMap::new(),
            events: BTreeMap::new(),
            created: None,
            started: None,
            stopped: None,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn action(mut self, action: ActionDefinition) -> Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    pub fn event(mut self, pattern: impl Into<String>, handler: EventHandler) -> Self {
        self.events.insert(pattern.into(), handler);
        self
    }

    pub fn on_created(mut self, hook: CreatedHook) -> Self {
        self.created = Some(hook);
        self
    }

    pub fn on_started(mut self, hook: LifecycleHook) -> Self {
        self.started = Some(hook);
        self
    }

    pub fn on_stopped(mut self, hook: LifecycleHook) -> Self {
        self.stopped = Some(hook);
        self
    }

    /// Versioned services register as `v<version>.<name>`.
    pub fn full_name(&self) -> String {
        match self.version {
            Some(v) => format!("v{}.{}", v, self.name),
            None => self.name.clone(),
        }
    }

    /// Qualified action name as registered in the registry.
    pub fn action_name(&self, short: &str) -> String {
        format!("{}.{}", self.full_name(), short)
    }

    /// Apply an overlay, producing the merged definition.
    pub fn merge(mut self, overlay: ServiceOverlay) -> Self {
        if let Some(name) = overlay.name {
            self.name = name;
        }
        if let Some(version) = overlay.version {
            self.version = Some(version);
        }
        if let Some(settings) = overlay.settings {
            deep_merge(&mut self.settings, &settings);
        }
        for (name, action) in overlay.actions {
            self.actions.insert(name, action);
        }
        for (pattern, handler) in overlay.events {
            self.events.insert(pattern, handler);
        }
        if overlay.created.is_some() {
            self.created = overlay.created;
        }
        if overlay.started.is_some() {
            self.started = overlay.started;
        }
        if overlay.stopped.is_some() {
            self.stopped = overlay.stopped;
        }
        self
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Partial definition applied over a base service by [`ServiceDefinition::merge`].
#[derive(Clone, Default)]
pub struct ServiceOverlay {
    pub name: Option<String>,
    pub version: Option<u32>,
    pub settings: Option<Value>,
    pub actions: BTreeMap<String, ActionDefinition>,
    pub events: BTreeMap<String, EventHandler>,
    pub created: Option<CreatedHook>,
    pub started: Option<LifecycleHook>,
    pub stopped: Option<LifecycleHook>,
}

impl ServiceOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn action(mut self, action: ActionDefinition) -> Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    pub fn event(mut self, pattern: impl Into<String>, handler: EventHandler) -> Self {
        self.events.insert(pattern.into(), handler);
        self
    }

    pub fn on_started(mut self, hook: LifecycleHook) -> Self {
        self.started = Some(hook);
        self
    }

    pub fn on_stopped(mut self, hook: LifecycleHook) -> Self {
        self.stopped = Some(hook);
        self
    }
}

/// Recursive object merge; non-object values (arrays included) replace the
/// base value wholesale.
fn deep_merge(base: &mut Value, extra: &Value) {
    match (base, extra) {
        (Value::Object(base_map), Value::Object(extra_map)) => {
            for (key, value) in extra_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, other) => *base_slot = other.clone(),
    }
}
