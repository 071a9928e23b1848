//! Convenient re-exports for common Hivewire types.
pub use crate::{
    action_handler, lifecycle_hook, ActionDefinition, BrokerError, BrokerOptions, CallOptions,
    ChannelHub, ChannelTransporter, CircuitBreakerOptions, Context, FallbackResponse,
    JsonSerializer, MemoryCacher, RegistryOptions, ServiceBroker, ServiceDefinition,
    ServiceOverlay, Strategy, Transporter,
};
