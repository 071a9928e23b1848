//! Error taxonomy for broker calls.
//!
//! Every error kind carries a numeric code modeled on HTTP status codes.
//! Codes ≥ 500 are considered retryable and may count against an endpoint's
//! circuit breaker, depending on breaker configuration.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Unified error type surfaced by [`crate::ServiceBroker::call`] and carried
/// across the wire in RESPONSE frames.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// No endpoint anywhere in the cluster exposes the action.
    ServiceNotFound { action: String },
    /// The action exists but no endpoint can accept the call right now
    /// (all breakers open, or the pinned node does not expose it).
    ServiceNotAvailable {
        action: String,
        node_id: Option<String>,
    },
    /// The call did not complete within its timeout.
    RequestTimeout {
        action: String,
        node_id: Option<String>,
        elapsed: Duration,
    },
    /// The call was skipped because the caller's deadline already passed.
    RequestSkipped { action: String },
    /// Action parameters failed schema validation.
    Validation { message: String, data: Option<Value> },
    /// The context chain exceeded the configured maximum call depth.
    MaxCallLevel { action: String, level: u32 },
    /// Application-level failure raised by a handler, or a foreign error
    /// coerced at the pipeline boundary.
    Custom {
        message: String,
        code: u16,
        data: Option<Value>,
        node_id: Option<String>,
    },
}

impl BrokerError {
    pub fn service_not_found(action: impl Into<String>) -> Self {
        Self::ServiceNotFound { action: action.into() }
    }

    pub fn service_not_available(action: impl Into<String>, node_id: Option<String>) -> Self {
        Self::ServiceNotAvailable { action: action.into(), node_id }
    }

    pub fn request_timeout(
        action: impl Into<String>,
        node_id: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self::RequestTimeout { action: action.into(), node_id, elapsed }
    }

    pub fn validation(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Validation { message: message.into(), data }
    }

    pub fn max_call_level(action: impl Into<String>, level: u32) -> Self {
        Self::MaxCallLevel { action: action.into(), level }
    }

    /// Coerce a foreign failure (a bare message) into a coded error.
    pub fn custom(message: impl Into<String>, code: u16) -> Self {
        Self::Custom { message: message.into(), code, data: None, node_id: None }
    }

    /// Numeric code for this kind.
    pub fn code(&self) -> u16 {
        match self {
            Self::ServiceNotFound { .. } | Self::ServiceNotAvailable { .. } => 404,
            Self::RequestTimeout { .. } => 504,
            Self::RequestSkipped { .. } => 514,
            Self::Validation { .. } => 422,
            Self::MaxCallLevel { .. } => 500,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Whether the call pipeline may retry after this error.
    ///
    /// Timeouts are always retryable; everything else only when its code is
    /// in the 5xx range and the kind is not a routing/validation verdict.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestTimeout { .. } => true,
            Self::Custom { code, .. } => *code >= 500,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Whether this error increments an endpoint's failure counter.
    pub fn counts_as_breaker_failure(&self, on_timeout: bool, on_reject: bool) -> bool {
        match self {
            Self::RequestTimeout { .. } => on_timeout,
            Self::Custom { code, .. } => on_reject && *code >= 500,
            _ => false,
        }
    }

    /// Structured detail payload, mirroring what the wire form carries.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::ServiceNotFound { action } => Some(json!({ "action": action })),
            Self::ServiceNotAvailable { action, node_id } => {
                Some(json!({ "action": action, "nodeID": node_id }))
            }
            Self::RequestTimeout { action, node_id, .. } => {
                Some(json!({ "action": action, "nodeID": node_id }))
            }
            Self::RequestSkipped { action } => Some(json!({ "action": action })),
            Self::Validation { data, .. } => data.clone(),
            Self::MaxCallLevel { action, level } => {
                Some(json!({ "action": action, "level": level }))
            }
            Self::Custom { data, .. } => data.clone(),
        }
    }

    /// Node the error originated on, when known.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::ServiceNotAvailable { node_id, .. }
            | Self::RequestTimeout { node_id, .. }
            | Self::Custom { node_id, .. } => node_id.as_deref(),
            _ => None,
        }
    }

    /// Stable kind name used in RESPONSE frames.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceNotFound { .. } => "ServiceNotFoundError",
            Self::ServiceNotAvailable { .. } => "ServiceNotAvailableError",
            Self::RequestTimeout { .. } => "RequestTimeoutError",
            Self::RequestSkipped { .. } => "RequestSkippedError",
            Self::Validation { .. } => "ValidationError",
            Self::MaxCallLevel { .. } => "MaxCallLevelError",
            Self::Custom { .. } => "CustomError",
        }
    }

    /// Serialize into the form embedded in RESPONSE frames.
    pub fn to_wire(&self, sender: &str) -> WireError {
        WireError {
            name: self.name().to_string(),
            message: self.to_string(),
            code: self.code(),
            data: self.data(),
            node_id: self.node_id().map(str::to_string).or_else(|| Some(sender.to_string())),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceNotFound { action } => {
                write!(f, "Action '{}' is not registered!", action)
            }
            Self::ServiceNotAvailable { action, node_id: Some(node) } => {
                write!(f, "Action '{}' is not available on node '{}'!", action, node)
            }
            Self::ServiceNotAvailable { action, node_id: None } => {
                write!(f, "Action '{}' is not available!", action)
            }
            Self::RequestTimeout { action, node_id: Some(node), elapsed } => {
                write!(
                    f,
                    "Request to '{}' on node '{}' timed out after {:?}!",
                    action, node, elapsed
                )
            }
            Self::RequestTimeout { action, node_id: None, elapsed } => {
                write!(f, "Request to '{}' timed out after {:?}!", action, elapsed)
            }
            Self::RequestSkipped { action } => {
                write!(f, "Call to '{}' was skipped because its deadline passed!", action)
            }
            Self::Validation { message, .. } => write!(f, "{}", message),
            Self::MaxCallLevel { level, .. } => {
                write!(f, "Max call level reached (level: {})!", level)
            }
            Self::Custom { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Serde form of a [`BrokerError`] as carried inside RESPONSE frames.
///
/// The kind name survives the round trip so the receiving broker can rebuild
/// the matching variant; unknown names deserialize as [`BrokerError::Custom`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub name: String,
    pub message: String,
    pub code: u16,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, rename = "nodeID")]
    pub node_id: Option<String>,
}

impl WireError {
    /// Rebuild the typed error on the receiving side.
    pub fn into_broker_error(self) -> BrokerError {
        let action = self
            .data
            .as_ref()
            .and_then(|d| d.get("action"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match self.name.as_str() {
            "ServiceNotFoundError" => BrokerError::ServiceNotFound { action },
            "ServiceNotAvailableError" => {
                BrokerError::ServiceNotAvailable { action, node_id: self.node_id }
            }
            "RequestTimeoutError" => BrokerError::RequestTimeout {
                action,
                node_id: self.node_id,
                elapsed: Duration::ZERO,
            },
            "RequestSkippedError" => BrokerError::RequestSkipped { action },
            "ValidationError" => {
                BrokerError::Validation { message: self.message, data: self.data }
            }
            "MaxCallLevelError" => {
                let level = self
                    .data
                    .as_ref()
                    .and_then(|d| d.get("level"))
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as u32;
                BrokerError::MaxCallLevel { action, level }
            }
            _ => BrokerError::Custom {
                message: self.message,
                code: self.code,
                data: self.data,
                node_id: self.node_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_registered_message_and_data() {
        let err = BrokerError::service_not_found("posts.nope");
        assert_eq!(err.to_string(), "Action 'posts.nope' is not registered!");
        assert_eq!(err.code(), 404);
        assert_eq!(err.data().unwrap(), json!({ "action": "posts.nope" }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_available_message_names_the_node() {
        let err = BrokerError::service_not_available("user.create", Some("server-2".into()));
        assert_eq!(
            err.to_string(),
            "Action 'user.create' is not available on node 'server-2'!"
        );
        assert_eq!(err.node_id(), Some("server-2"));
    }

    #[test]
    fn timeout_is_retryable_and_504() {
        let err = BrokerError::request_timeout("posts.find", None, Duration::from_secs(1));
        assert_eq!(err.code(), 504);
        assert!(err.is_retryable());
        assert!(err.is_timeout());
    }

    #[test]
    fn custom_retryable_only_at_5xx() {
        assert!(BrokerError::custom("boom", 500).is_retryable());
        assert!(BrokerError::custom("boom", 503).is_retryable());
        assert!(!BrokerError::custom("bad input", 400).is_retryable());
    }

    #[test]
    fn breaker_failure_respects_flags() {
        let timeout = BrokerError::request_timeout("a.b", None, Duration::ZERO);
        assert!(timeout.counts_as_breaker_failure(true, false));
        assert!(!timeout.counts_as_breaker_failure(false, true));

        let reject = BrokerError::custom("boom", 500);
        assert!(reject.counts_as_breaker_failure(false, true));
        assert!(!reject.counts_as_breaker_failure(true, false));

        let not_found = BrokerError::service_not_found("a.b");
        assert!(!not_found.counts_as_breaker_failure(true, true));
    }

    #[test]
    fn max_call_level_data_shape() {
        let err = BrokerError::max_call_level("posts.find", 6);
        assert_eq!(err.code(), 500);
        assert_eq!(err.data().unwrap(), json!({ "action": "posts.find", "level": 6 }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn wire_round_trip_preserves_kind() {
        let original = BrokerError::service_not_found("posts.nope");
        let wire = original.to_wire("node-1");
        let bytes = serde_json::to_vec(&wire).unwrap();
        let back: WireError = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.into_broker_error(), original);
    }

    #[test]
    fn unknown_wire_name_becomes_custom() {
        let wire = WireError {
            name: "SomethingElse".into(),
            message: "weird".into(),
            code: 512,
            data: None,
            node_id: Some("n2".into()),
        };
        let err = wire.into_broker_error();
        assert_eq!(err.code(), 512);
        assert!(matches!(err, BrokerError::Custom { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn wire_error_carries_sender_when_origin_unknown() {
        let wire = BrokerError::custom("boom", 500).to_wire("server-9");
        assert_eq!(wire.node_id.as_deref(), Some("server-9"));
    }
}
