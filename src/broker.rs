//! The service broker: hosts services, routes calls, bridges events.
//!
//! `call` drives the whole pipeline: resolve an endpoint through the
//! registry, build or derive the context, gate on the endpoint's circuit
//! breaker, dispatch locally or through transit, race the timeout, then run
//! the error path (breaker bookkeeping, retry, fallback). A retry re-enters
//! the loop with the SAME context, so the call keeps its id and trace root
//! while the endpoint is re-resolved each attempt.

use crate::cacher::{cache_key, Cacher};
use crate::clock::{Clock, MonotonicClock};
use crate::config::BrokerOptions;
use crate::context::Context;
use crate::error::BrokerError;
use crate::event_bus::{EventBus, EventHandler, SubscriptionId};
use crate::metrics::{
    span_finish_payload, span_start_payload, MetricsSampler, SPAN_FINISH_EVENT, SPAN_START_EVENT,
};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::registry::{
    ActionInfo, CircuitState, Endpoint, NodeCatalog, RegisteredAction, ServiceInfo,
    ServiceRegistry,
};
use crate::serializer::{JsonSerializer, Serializer};
use crate::service::{ActionDefinition, ActionHandler, ServiceDefinition};
use crate::stats::StatisticsCollector;
use crate::transit::{PacketPayload, Transit};
use crate::transport::Transporter;
use crate::validator::{JsonSchemaValidator, Validator};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Per-call options for [`ServiceBroker::call`].
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Per-attempt timeout; falls back to the broker default when unset.
    pub timeout: Option<Duration>,
    /// Retry budget for retryable failures; broker default when unset.
    pub retry_count: Option<u32>,
    /// Resolution of last resort after retries are exhausted.
    pub fallback: Option<FallbackResponse>,
    /// Pin the call to a specific node.
    pub node_id: Option<String>,
    /// Extra meta merged over the context's meta (override wins).
    pub meta: Option<Value>,
    /// Derive a child context from this parent.
    pub parent_ctx: Option<Context>,
    /// Reuse an existing context instead of creating one.
    pub ctx: Option<Context>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn fallback_value(mut self, value: Value) -> Self {
        self.fallback = Some(FallbackResponse::Value(value));
        self
    }

    pub fn fallback_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &BrokerError) -> Value + Send + Sync + 'static,
    {
        self.fallback = Some(FallbackResponse::Handler(Arc::new(handler)));
        self
    }

    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn parent(mut self, parent: Context) -> Self {
        self.parent_ctx = Some(parent);
        self
    }

    pub fn context(mut self, ctx: Context) -> Self {
        self.ctx = Some(ctx);
        self
    }
}

/// What to resolve with when the call ultimately fails.
#[derive(Clone)]
pub enum FallbackResponse {
    Value(Value),
    Handler(Arc<dyn Fn(&Context, &BrokerError) -> Value + Send + Sync>),
}

/// Builder for [`ServiceBroker`]; inject transport, serializer, cacher, or a
/// test clock here.
pub struct BrokerBuilder {
    options: BrokerOptions,
    transporter: Option<Arc<dyn Transporter>>,
    serializer: Arc<dyn Serializer>,
    cacher: Option<Arc<dyn Cacher>>,
    validator: Arc<dyn Validator>,
    clock: Arc<dyn Clock>,
}

impl BrokerBuilder {
    pub fn new(options: BrokerOptions) -> Self {
        Self {
            options,
            transporter: None,
            serializer: Arc::new(JsonSerializer),
            cacher: None,
            validator: Arc::new(JsonSchemaValidator),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn transporter(mut self, transporter: Arc<dyn Transporter>) -> Self {
        self.transporter = Some(transporter);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn cacher(mut self, cacher: Arc<dyn Cacher>) -> Self {
        self.cacher = Some(cacher);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Arc<ServiceBroker> {
        let catalog = Arc::new(NodeCatalog::new(self.clock.clone()));
        let registry = ServiceRegistry::new(
            self.options.node_id.clone(),
            self.options.registry.clone(),
            self.options.circuit_breaker.clone(),
            self.clock.clone(),
        );
        let sampler = MetricsSampler::new(self.options.metrics, self.options.metrics_rate);
        let internal_actions = self.options.internal_actions;
        let statistics = self.options.statistics;

        let broker = Arc::new_cyclic(|self_ref: &Weak<ServiceBroker>| ServiceBroker {
            self_ref: self_ref.clone(),
            options: self.options,
            registry,
            catalog,
            bus: EventBus::new(),
            middlewares: Mutex::new(MiddlewareChain::new()),
            sampler,
            stats: StatisticsCollector::new(),
            validator: self.validator,
            cacher: self.cacher,
            serializer: self.serializer,
            transporter: self.transporter,
            transit: Mutex::new(None),
            services: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            started_at: Instant::now(),
        });

        if internal_actions {
            let node_service = crate::internal::node_service(Arc::downgrade(&broker), statistics);
            if let Err(e) = broker.install_service(node_service) {
                tracing::error!(error = %e, "failed to register $node service");
            }
        }
        broker
    }
}

pub struct ServiceBroker {
    self_ref: Weak<ServiceBroker>,
    options: BrokerOptions,
    registry: ServiceRegistry,
    catalog: Arc<NodeCatalog>,
    bus: EventBus,
    middlewares: Mutex<MiddlewareChain>,
    sampler: MetricsSampler,
    stats: StatisticsCollector,
    validator: Arc<dyn Validator>,
    cacher: Option<Arc<dyn Cacher>>,
    serializer: Arc<dyn Serializer>,
    transporter: Option<Arc<dyn Transporter>>,
    transit: Mutex<Option<Arc<Transit>>>,
    services: Mutex<Vec<Arc<ServiceDefinition>>>,
    started: AtomicBool,
    started_at: Instant,
}

impl ServiceBroker {
    pub fn builder(options: BrokerOptions) -> BrokerBuilder {
        BrokerBuilder::new(options)
    }

    /// Broker with default collaborators and no transport.
    pub fn new(options: BrokerOptions) -> Arc<Self> {
        BrokerBuilder::new(options).build()
    }

    pub fn node_id(&self) -> &str {
        self.registry.local_node_id()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn nodes(&self) -> &NodeCatalog {
        &self.catalog
    }

    pub fn transit(&self) -> Option<Arc<Transit>> {
        self.lock_transit().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn statistics_snapshot(&self) -> Value {
        self.stats.snapshot()
    }

    /// Register a middleware. Applies to actions of services registered
    /// AFTER this point; already-wrapped actions are not rewrapped.
    pub fn use_middleware(&self, middleware: Middleware) {
        self.middlewares
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(middleware);
    }

    /// Host a service on this broker. Runs the `created` hook, wraps and
    /// registers every action, and subscribes the service's event handlers.
    /// When the broker is already started the `started` hook runs before
    /// this returns.
    pub async fn add_service(&self, definition: ServiceDefinition) -> Result<(), BrokerError> {
        let service = self.install_service(definition)?;
        if self.is_started() {
            if let Some(hook) = &service.started {
                hook().await?;
            }
        }
        Ok(())
    }

    fn install_service(&self, definition: ServiceDefinition) -> Result<Arc<ServiceDefinition>, BrokerError> {
        let full_name = definition.full_name();
        {
            let services = self.lock_services();
            if services.iter().any(|s| s.full_name() == full_name) {
                return Err(BrokerError::custom(
                    format!("Service '{}' is already registered on this node!", full_name),
                    500,
                ));
            }
        }

        if let Some(created) = &definition.created {
            created();
        }

        for action in definition.actions.values() {
            let qualified = definition.action_name(&action.name);
            let handler = self.wrap_action(action, &qualified)?;
            let added = self.registry.register(
                None,
                RegisteredAction { name: qualified.clone(), cache: action.cache, handler: Some(handler) },
            );
            if added {
                self.bus.emit(
                    &format!("register.action.{}", qualified),
                    &json!({ "action": qualified, "nodeID": Value::Null }),
                );
            }
        }

        for (pattern, handler) in &definition.events {
            self.bus.on(pattern, handler.clone());
        }

        let service = Arc::new(definition);
        self.lock_services().push(service.clone());
        tracing::info!(service = %full_name, "service registered");
        Ok(service)
    }

    /// Build the handler stack for one action: params validation innermost,
    /// then user middlewares, then the cache layer outermost.
    fn wrap_action(&self, action: &ActionDefinition, qualified: &str) -> Result<ActionHandler, BrokerError> {
        let mut handler = action.handler.clone();

        if self.options.validation {
            if let Some(schema) = &action.params {
                let check = self.validator.compile(schema)?;
                let inner = handler;
                handler = Arc::new(move |ctx: Context| {
                    let inner = inner.clone();
                    let check = check.clone();
                    Box::pin(async move {
                        check(&ctx.params)?;
                        inner(ctx).await
                    })
                });
            }
        }

        handler = self
            .middlewares
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .wrap(handler, action);

        if action.cache {
            if let Some(cacher) = self.cacher.clone() {
                let inner = handler;
                let qualified = qualified.to_string();
                handler = Arc::new(move |ctx: Context| {
                    let inner = inner.clone();
                    let cacher = cacher.clone();
                    let key = cache_key(&qualified, &ctx.params);
                    Box::pin(async move {
                        if let Some(hit) = cacher.get(&key).await {
                            return Ok(hit);
                        }
                        let value = inner(ctx).await?;
                        cacher.set(&key, value.clone()).await;
                        Ok(value)
                    })
                });
            }
        }

        Ok(handler)
    }

    // ---- events ------------------------------------------------------

    pub fn on(&self, pattern: &str, handler: EventHandler) -> SubscriptionId {
        self.bus.on(pattern, handler)
    }

    pub fn once(&self, pattern: &str, handler: EventHandler) -> SubscriptionId {
        self.bus.once(pattern, handler)
    }

    pub fn off(&self, pattern: &str, id: SubscriptionId) -> bool {
        self.bus.off(pattern, id)
    }

    /// Deliver locally and, when transit is connected, broadcast an EVENT
    /// frame so every other node delivers locally too. Returns the local
    /// delivery count.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let delivered = self.bus.emit(event, payload);
        if let Some(transit) = self.lock_transit().clone() {
            let event = event.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                transit.send_event(&event, &payload).await;
            });
        }
        delivered
    }

    /// Local-only delivery; used for incoming EVENT frames.
    pub(crate) fn emit_local(&self, event: &str, payload: &Value) -> usize {
        self.bus.emit(event, payload)
    }

    // ---- call pipeline -----------------------------------------------

    /// Invoke an action by name.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        opts: CallOptions,
    ) -> Result<Value, BrokerError> {
        let cb = &self.options.circuit_breaker;

        let mut ctx = if let Some(existing) = opts.ctx.clone() {
            let mut ctx = existing;
            if let Some(timeout) = opts.timeout {
                ctx.timeout = timeout;
            }
            if let Some(retries) = opts.retry_count {
                ctx.retry_count = retries;
            }
            ctx
        } else if let Some(parent) = opts.parent_ctx.as_ref() {
            let level = parent.level + 1;
            if self.options.max_call_level > 0 && level > self.options.max_call_level {
                tracing::error!(action, level, "max call level exceeded");
                return Err(BrokerError::max_call_level(action, level));
            }
            let mut ctx = Context::child_of(parent, action, params);
            if let Some(meta) = &opts.meta {
                ctx.merge_meta(meta);
            }
            ctx.timeout = opts.timeout.unwrap_or(self.options.request_timeout);
            ctx.retry_count = opts.retry_count.unwrap_or(self.options.request_retry);
            ctx
        } else {
            let mut ctx = Context::new_root(action, params, self.sampler.should_sample());
            if let Some(meta) = &opts.meta {
                ctx.merge_meta(meta);
            }
            ctx.timeout = opts.timeout.unwrap_or(self.options.request_timeout);
            ctx.retry_count = opts.retry_count.unwrap_or(self.options.request_retry);
            ctx
        };

        let prefer_node = opts.node_id.clone();
        loop {
            let attempt_started = Instant::now();
            let mut endpoint_ref: Option<Arc<Endpoint>> = None;

            let resolved = match self.registry.find_endpoint(action, prefer_node.as_deref()) {
                Some(endpoint) => Ok(endpoint),
                None if !self.registry.has_action(action) => {
                    Err(BrokerError::service_not_found(action))
                }
                None => Err(BrokerError::service_not_available(action, prefer_node.clone())),
            };

            let attempt = match resolved {
                Err(e) => Err(e),
                Ok(endpoint) => {
                    endpoint_ref = Some(endpoint.clone());
                    if cb.enabled && endpoint.breaker.state() == CircuitState::Open {
                        Err(BrokerError::service_not_available(
                            action,
                            Some(endpoint.node_id.clone()),
                        ))
                    } else {
                        if cb.enabled {
                            // commits Open → HalfOpen when this is a probe
                            endpoint.breaker.try_probe();
                        }
                        ctx.node_id =
                            (!endpoint.is_local()).then(|| endpoint.node_id.clone());
                        if ctx.metrics {
                            ctx.span_started();
                            self.emit(SPAN_START_EVENT, &span_start_payload(&ctx, self.node_id()));
                        }
                        self.dispatch(&ctx, &endpoint).await
                    }
                }
            };

            match attempt {
                Ok(value) => {
                    if cb.enabled {
                        if let Some(endpoint) = &endpoint_ref {
                            endpoint.breaker.success();
                        }
                    }
                    self.finish_call(&mut ctx, attempt_started.elapsed(), None, endpoint_ref.as_deref());
                    return Ok(value);
                }
                Err(err) => {
                    if cb.enabled {
                        if let Some(endpoint) = &endpoint_ref {
                            if err.counts_as_breaker_failure(cb.failure_on_timeout, cb.failure_on_reject)
                            {
                                endpoint.breaker.failure();
                            }
                        }
                    }

                    if ctx.retry_count > 0 && err.is_retryable() {
                        ctx.retry_count -= 1;
                        tracing::warn!(
                            action,
                            remaining = ctx.retry_count,
                            error = %err,
                            "retrying call"
                        );
                        continue;
                    }

                    if let Some(fallback) = &opts.fallback {
                        tracing::debug!(action, error = %err, "resolving with fallback");
                        let value = match fallback {
                            FallbackResponse::Value(value) => value.clone(),
                            FallbackResponse::Handler(handler) => handler(&ctx, &err),
                        };
                        self.finish_call(
                            &mut ctx,
                            attempt_started.elapsed(),
                            Some(&err),
                            endpoint_ref.as_deref(),
                        );
                        return Ok(value);
                    }

                    self.finish_call(
                        &mut ctx,
                        attempt_started.elapsed(),
                        Some(&err),
                        endpoint_ref.as_deref(),
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn dispatch(
        &self,
        ctx: &Context,
        endpoint: &Arc<Endpoint>,
    ) -> Result<Value, BrokerError> {
        let work = async {
            match endpoint.handler.clone().filter(|_| endpoint.is_local()) {
                Some(handler) => handler(ctx.clone()).await,
                None => {
                    let transit = self.lock_transit().clone().ok_or_else(|| {
                        BrokerError::service_not_available(
                            ctx.action.clone(),
                            Some(endpoint.node_id.clone()),
                        )
                    })?;
                    transit.request(ctx).await
                }
            }
        };

        if ctx.timeout > Duration::ZERO {
            let started = Instant::now();
            tokio::select! {
                result = work => result,
                _ = tokio::time::sleep(ctx.timeout) => {
                    // the pending entry must be gone before any retry goes out
                    if let Some(transit) = self.lock_transit().clone() {
                        transit.cancel(ctx.id);
                    }
                    tracing::warn!(action = %ctx.action, timeout = ?ctx.timeout, "request timed out");
                    Err(BrokerError::request_timeout(
                        ctx.action.clone(),
                        ctx.node_id.clone(),
                        started.elapsed(),
                    ))
                }
            }
        } else {
            work.await
        }
    }

    fn finish_call(
        &self,
        ctx: &mut Context,
        elapsed: Duration,
        error: Option<&BrokerError>,
        endpoint: Option<&Endpoint>,
    ) {
        if ctx.metrics {
            ctx.span_finished(elapsed);
            self.emit(SPAN_FINISH_EVENT, &span_finish_payload(ctx, self.node_id(), error));
        }
        if self.options.statistics && endpoint.map(|e| e.is_local()).unwrap_or(true) {
            self.stats.record(&ctx.action, elapsed, error.is_some());
        }
    }

    // ---- lifecycle ---------------------------------------------------

    /// Start the broker: init the cacher, connect transit when a transporter
    /// is configured, and run every service's `started` hook in registration
    /// order. Idempotent once committed.
    pub async fn start(&self) -> Result<(), BrokerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(node = %self.node_id(), "broker starting");

        if let Some(cacher) = &self.cacher {
            cacher.init(self.node_id());
        }

        if let Some(transporter) = &self.transporter {
            let transit = Transit::new(
                self.node_id().to_string(),
                self.self_ref.clone(),
                transporter.clone(),
                self.serializer.clone(),
                self.catalog.clone(),
                self.options.heartbeat_interval,
                self.options.heartbeat_timeout,
            );
            *self.lock_transit() = Some(transit.clone());
            if let Err(e) = transit.connect().await {
                *self.lock_transit() = None;
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        }

        let services = self.lock_services().clone();
        for service in services {
            if let Some(hook) = &service.started {
                hook().await?;
            }
        }

        self.bus.emit("broker.started", &json!({ "nodeID": self.node_id() }));
        tracing::info!(node = %self.node_id(), "broker started");
        Ok(())
    }

    /// Stop the broker: run `stopped` hooks in reverse registration order,
    /// then broadcast DISCONNECT and drop the transport. Idempotent.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(node = %self.node_id(), "broker stopping");

        let services = self.lock_services().clone();
        for service in services.iter().rev() {
            if let Some(hook) = &service.stopped {
                if let Err(e) = hook().await {
                    tracing::error!(service = %service.full_name(), error = %e, "stopped hook failed");
                }
            }
        }

        let transit = self.lock_transit().take();
        if let Some(transit) = transit {
            transit.disconnect().await;
        }

        self.bus.emit("broker.stopped", &json!({ "nodeID": self.node_id() }));
        tracing::info!(node = %self.node_id(), "broker stopped");
    }

    // ---- transit callbacks -------------------------------------------

    /// Description of the local services for INFO frames.
    pub(crate) fn local_service_info(&self) -> Vec<ServiceInfo> {
        self.lock_services()
            .iter()
            .map(|service| ServiceInfo {
                name: service.name.clone(),
                version: service.version,
                settings: service.settings.clone(),
                actions: service
                    .actions
                    .values()
                    .map(|action| ActionInfo {
                        name: service.action_name(&action.name),
                        cache: action.cache,
                    })
                    .collect(),
                events: service.events.keys().cloned().collect(),
            })
            .collect()
    }

    /// INFO frame received: refresh the catalog and (re)register the node's
    /// endpoints. Registration events fire for remote endpoints exactly like
    /// local ones; the payload's `nodeID` tells them apart.
    pub(crate) fn register_remote_node(
        &self,
        node_id: &str,
        ip_list: Vec<String>,
        services: Vec<ServiceInfo>,
        uptime_secs: u64,
    ) {
        let connected = self.catalog.upsert(node_id, ip_list, services.clone(), uptime_secs);
        // a refreshed INFO replaces the node's endpoint set wholesale
        self.registry.deregister_node(node_id);
        for service in &services {
            for action in &service.actions {
                let added = self.registry.register(
                    Some(node_id),
                    RegisteredAction { name: action.name.clone(), cache: action.cache, handler: None },
                );
                if added {
                    self.bus.emit(
                        &format!("register.action.{}", action.name),
                        &json!({ "action": action.name, "nodeID": node_id }),
                    );
                }
            }
        }
        if connected {
            tracing::info!(node = %node_id, "node connected");
            self.bus.emit("node.connected", &json!({ "nodeID": node_id }));
        }
    }

    /// DISCONNECT frame or heartbeat timeout: deregister the node's
    /// endpoints and fail its pending requests. Idempotent per disconnect.
    pub(crate) fn node_disconnected(&self, node_id: &str, unexpected: bool) {
        if !self.catalog.mark_disconnected(node_id) {
            return;
        }
        let removed = self.registry.deregister_node(node_id);
        if let Some(transit) = self.lock_transit().clone() {
            transit.reject_pending_for_node(node_id);
        }
        if unexpected {
            tracing::warn!(node = %node_id, actions = removed.len(), "node disconnected unexpectedly");
        } else {
            tracing::info!(node = %node_id, actions = removed.len(), "node disconnected");
        }
        self.bus.emit(
            "node.disconnected",
            &json!({ "nodeID": node_id, "unexpected": unexpected }),
        );
    }

    /// Serve a REQUEST frame: run the local wrapped handler and shape the
    /// RESPONSE payload.
    pub(crate) async fn handle_remote_request(&self, mut ctx: Context) -> PacketPayload {
        let id = ctx.id;
        let endpoint = self
            .registry
            .find_endpoint(&ctx.action, Some(self.node_id()))
            .filter(|e| e.is_local() && e.handler.is_some());
        let Some(endpoint) = endpoint else {
            let err = BrokerError::service_not_found(ctx.action.clone());
            return PacketPayload::Response {
                id,
                success: false,
                data: None,
                error: Some(err.to_wire(self.node_id())),
            };
        };
        let handler = endpoint
            .handler
            .clone()
            .expect("local endpoint always carries a handler");

        if ctx.metrics {
            ctx.span_started();
            self.emit(SPAN_START_EVENT, &span_start_payload(&ctx, self.node_id()));
        }
        let started = Instant::now();
        let result = handler(ctx.clone()).await;
        let elapsed = started.elapsed();
        self.finish_call(&mut ctx, elapsed, result.as_ref().err(), Some(&endpoint));

        match result {
            Ok(value) => PacketPayload::Response { id, success: true, data: Some(value), error: None },
            Err(err) => PacketPayload::Response {
                id,
                success: false,
                data: None,
                error: Some(err.to_wire(self.node_id())),
            },
        }
    }

    fn lock_services(&self) -> std::sync::MutexGuard<'_, Vec<Arc<ServiceDefinition>>> {
        self.services.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_transit(&self) -> std::sync::MutexGuard<'_, Option<Arc<Transit>>> {
        self.transit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ServiceBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBroker")
            .field("node_id", &self.node_id())
            .field("started", &self.is_started())
            .field("services", &self.lock_services().len())
            .finish()
    }
}
