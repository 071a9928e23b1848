//! Per-call context.
//!
//! A `Context` is created (or derived) for every `call` and carries the
//! call's identity and propagation data: a unique id, the trace root
//! (`request_id`), the parent link and nesting level, the target node, the
//! params/meta payloads, and the timing of its metric span. After dispatch a
//! context is treated as immutable except for the retry budget.

use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Context {
    /// Unique 128-bit call id.
    pub id: Uuid,
    /// Trace root shared by a whole call tree. Populated for root calls only
    /// when the call is metrics-sampled; children always inherit.
    pub request_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    /// 1 for root calls, parent level + 1 for nested calls.
    pub level: u32,
    /// Target node for remote dispatch; `None` for local execution.
    pub node_id: Option<String>,
    /// Fully qualified action name (`"service.method"`).
    pub action: String,
    pub params: Value,
    /// Shallow-merged metadata object propagated down the call tree.
    pub meta: Value,
    /// Per-attempt timeout; `Duration::ZERO` disables the timer.
    pub timeout: Duration,
    /// Remaining retry budget; decremented by the pipeline on retry.
    pub retry_count: u32,
    /// Whether this call was metrics-sampled.
    pub metrics: bool,
    /// Wall-clock start of the metric span, epoch milliseconds.
    pub start_time_ms: u64,
    /// Filled when the span finishes.
    pub duration: Option<Duration>,
}

impl Context {
    /// Root context for a fresh call tree.
    pub fn new_root(action: impl Into<String>, params: Value, sampled: bool) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            request_id: sampled.then_some(id),
            parent_id: None,
            level: 1,
            node_id: None,
            action: action.into(),
            params: normalize_params(params),
            meta: Value::Object(Map::new()),
            timeout: Duration::ZERO,
            retry_count: 0,
            metrics: sampled,
            start_time_ms: 0,
            duration: None,
        }
    }

    /// Child context: one level deeper, same trace root, meta merged with the
    /// child's overrides winning.
    pub fn child_of(parent: &Context, action: impl Into<String>, params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: parent.request_id,
            parent_id: Some(parent.id),
            level: parent.level + 1,
            node_id: None,
            action: action.into(),
            params: normalize_params(params),
            meta: parent.meta.clone(),
            timeout: Duration::ZERO,
            retry_count: 0,
            metrics: parent.metrics,
            start_time_ms: 0,
            duration: None,
        }
    }

    /// Rebuild a context on the receiving side of a REQUEST frame.
    #[allow(clippy::too_many_arguments)]
    pub fn for_incoming(
        id: Uuid,
        action: impl Into<String>,
        params: Value,
        meta: Value,
        level: u32,
        parent_id: Option<Uuid>,
        request_id: Option<Uuid>,
        metrics: bool,
    ) -> Self {
        Self {
            id,
            request_id,
            parent_id,
            level,
            node_id: None,
            action: action.into(),
            params: normalize_params(params),
            meta,
            timeout: Duration::ZERO,
            retry_count: 0,
            metrics,
            start_time_ms: 0,
            duration: None,
        }
    }

    /// Shallow-merge `overrides` into this context's meta; override keys win.
    pub fn merge_meta(&mut self, overrides: &Value) {
        if let (Value::Object(base), Value::Object(extra)) = (&mut self.meta, overrides) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
    }

    /// Stamp the metric span's start.
    pub fn span_started(&mut self) {
        self.start_time_ms = epoch_millis();
    }

    /// Stamp the metric span's end.
    pub fn span_finished(&mut self, elapsed: Duration) {
        self.duration = Some(elapsed);
    }
}

fn normalize_params(params: Value) -> Value {
    match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
