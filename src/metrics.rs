//! Deterministic metrics sampling and trace-span payloads.
//!
//! Sampling is an accumulator, not a random draw: every call adds the
//! configured rate, and the call is sampled exactly when the accumulator
//! crosses 1. Over N calls a rate r samples ⌊N·r + carry⌋ of them, with the
//! carry retained across the sequence, so tests observe exact counts.

use crate::context::Context;
use crate::error::BrokerError;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Event name published when a sampled span starts.
pub const SPAN_START_EVENT: &str = "metrics.trace.span.start";
/// Event name published when a sampled span finishes.
pub const SPAN_FINISH_EVENT: &str = "metrics.trace.span.finish";

#[derive(Debug)]
pub struct MetricsSampler {
    enabled: bool,
    rate: f64,
    accumulator: Mutex<f64>,
}

impl MetricsSampler {
    pub fn new(enabled: bool, rate: f64) -> Self {
        Self { enabled, rate, accumulator: Mutex::new(0.0) }
    }

    /// Decide whether the next call is sampled. Rate 0 never samples, rate 1
    /// always does, anything between follows the accumulator.
    pub fn should_sample(&self) -> bool {
        if !self.enabled || self.rate <= 0.0 {
            return false;
        }
        if self.rate >= 1.0 {
            return true;
        }
        let mut acc = self
            .accumulator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *acc += self.rate;
        if *acc >= 1.0 {
            *acc -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Payload for [`SPAN_START_EVENT`].
pub fn span_start_payload(ctx: &Context, local_node: &str) -> Value {
    json!({
        "id": ctx.id,
        "requestID": ctx.request_id,
        "parent": ctx.parent_id,
        "level": ctx.level,
        "action": { "name": ctx.action },
        "remoteCall": ctx.node_id.is_some(),
        "nodeID": ctx.node_id.as_deref().unwrap_or(local_node),
        "startTime": ctx.start_time_ms,
    })
}

/// Payload for [`SPAN_FINISH_EVENT`]. `error` is set when the span finished
/// with a failure, including the fallback path.
pub fn span_finish_payload(ctx: &Context, local_node: &str, error: Option<&BrokerError>) -> Value {
    let mut payload = json!({
        "id": ctx.id,
        "requestID": ctx.request_id,
        "parent": ctx.parent_id,
        "level": ctx.level,
        "action": { "name": ctx.action },
        "remoteCall": ctx.node_id.is_some(),
        "nodeID": ctx.node_id.as_deref().unwrap_or(local_node),
        "startTime": ctx.start_time_ms,
        "duration": ctx.duration.map(|d| d.as_secs_f64() * 1000.0),
    });
    if let Some(err) = error {
        payload["error"] = json!({
            "name": err.name(),
            "code": err.code(),
            "message": err.to_string(),
        });
    }
    payload
}
