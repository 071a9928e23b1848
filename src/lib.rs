#![forbid(unsafe_code)]

//! # Hivewire
//!
//! An embeddable microservices runtime for async Rust. The central type is
//! the [`ServiceBroker`]: a process-local hub that hosts services, routes
//! action calls to local or remote handlers, and propagates events across a
//! cluster of peer brokers connected through a pluggable transport.
//!
//! ## Features
//!
//! - **Service registry** with round-robin or random load balancing and
//!   local-endpoint preference
//! - **Per-endpoint circuit breakers** (lock-free atomics, half-open
//!   recovery probing)
//! - **Call pipeline** with timeout, retry, and fallback handling
//! - **Wildcard event bus** (`*`, `**`) bridged across the cluster
//! - **Transit protocol** with request correlation, heartbeats, and
//!   discovery over any [`Transporter`]
//!
//! ## Quick Start
//!
//! ```rust
//! use hivewire::{
//!     action_handler, ActionDefinition, BrokerOptions, CallOptions, ServiceBroker,
//!     ServiceDefinition,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hivewire::BrokerError> {
//!     let broker = ServiceBroker::new(BrokerOptions::default());
//!
//!     broker
//!         .add_service(ServiceDefinition::new("math").action(ActionDefinition::new(
//!             "add",
//!             action_handler(|ctx| async move {
//!                 let a = ctx.params["a"].as_i64().unwrap_or(0);
//!                 let b = ctx.params["b"].as_i64().unwrap_or(0);
//!                 Ok(json!(a + b))
//!             }),
//!         )))
//!         .await?;
//!
//!     broker.start().await?;
//!     let sum = broker
//!         .call("math.add", json!({ "a": 2, "b": 3 }), CallOptions::new())
//!         .await?;
//!     assert_eq!(sum, json!(5));
//!     broker.stop().await;
//!     Ok(())
//! }
//! ```

mod broker;
mod cacher;
mod clock;
mod config;
mod context;
mod error;
mod event_bus;
mod internal;
mod metrics;
mod middleware;
mod registry;
mod serializer;
mod service;
mod stats;
mod transit;
mod transport;
mod validator;

// Re-exports
pub use broker::{BrokerBuilder, CallOptions, FallbackResponse, ServiceBroker};
pub use cacher::{cache_key, Cacher, MemoryCacher};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BrokerOptions, CircuitBreakerOptions, RegistryOptions, Strategy};
pub use context::Context;
pub use error::{BrokerError, WireError};
pub use event_bus::{EventBus, EventHandler, SubscriptionId};
pub use metrics::{MetricsSampler, SPAN_FINISH_EVENT, SPAN_START_EVENT};
pub use middleware::{Middleware, MiddlewareChain};
pub use registry::{
    ActionInfo, ActionMap, CircuitBreaker, CircuitState, Endpoint, EndpointSnapshot, ListFilter,
    NodeCatalog, NodeInfo, RegisteredAction, ServiceInfo, ServiceRegistry,
};
pub use serializer::{JsonSerializer, MsgpackSerializer, Serializer, SerializerError};
pub use service::{
    action_handler, lifecycle_hook, ActionDefinition, ActionHandler, ActionResult, CreatedHook,
    LifecycleHook, ServiceDefinition, ServiceOverlay,
};
pub use stats::StatisticsCollector;
pub use transit::{
    discover_topic, disconnect_topic, event_topic, heartbeat_topic, info_broadcast_topic,
    info_topic, request_topic, response_topic, Packet, PacketPayload, Transit, PROTOCOL_VERSION,
    TOPIC_PREFIX,
};
pub use transport::{ChannelHub, ChannelTransporter, TransportError, Transporter};
pub use validator::{CompiledCheck, JsonSchemaValidator, Validator};

pub mod prelude;
