//! Wire frames exchanged between brokers.
//!
//! Every frame carries the protocol version and the sender's node id; the
//! payload is an internally tagged enum so the topic and the frame body can
//! be checked against each other on receipt.

use crate::error::WireError;
use crate::registry::ServiceInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Protocol version stamped into every frame.
pub const PROTOCOL_VERSION: &str = "1";

/// Topic namespace shared by all brokers on a transport.
pub const TOPIC_PREFIX: &str = "MOL";

pub fn request_topic(node_id: &str) -> String {
    format!("{}.REQ.{}", TOPIC_PREFIX, node_id)
}

pub fn response_topic(node_id: &str) -> String {
    format!("{}.RES.{}", TOPIC_PREFIX, node_id)
}

pub fn info_topic(node_id: &str) -> String {
    format!("{}.INFO.{}", TOPIC_PREFIX, node_id)
}

/// Shared INFO topic used for the connect-time announcement.
pub fn info_broadcast_topic() -> String {
    format!("{}.INFO", TOPIC_PREFIX)
}

pub fn heartbeat_topic() -> String {
    format!("{}.HEARTBEAT", TOPIC_PREFIX)
}

pub fn discover_topic() -> String {
    format!("{}.DISCOVER", TOPIC_PREFIX)
}

pub fn event_topic() -> String {
    format!("{}.EVENT", TOPIC_PREFIX)
}

pub fn disconnect_topic() -> String {
    format!("{}.DISCONNECT", TOPIC_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub ver: String,
    pub sender: String,
    #[serde(flatten)]
    pub payload: PacketPayload,
}

impl Packet {
    pub fn new(sender: impl Into<String>, payload: PacketPayload) -> Self {
        Self { ver: PROTOCOL_VERSION.to_string(), sender: sender.into(), payload }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketPayload {
    /// Broadcast on connect; peers reply with a unicast INFO.
    Discover,
    /// Node description: everything needed to register its endpoints.
    Info {
        services: Vec<ServiceInfo>,
        ip_list: Vec<String>,
        uptime_secs: u64,
    },
    /// Periodic liveness signal.
    Heartbeat {
        cpu: Option<f64>,
        uptime_secs: u64,
    },
    /// Graceful departure; peers drop the sender immediately.
    Disconnect,
    /// Remote action invocation.
    Request {
        id: Uuid,
        action: String,
        params: Value,
        meta: Value,
        timeout_ms: u64,
        level: u32,
        parent_id: Option<Uuid>,
        request_id: Option<Uuid>,
        metrics: bool,
    },
    /// Reply to a REQUEST, correlated by id.
    Response {
        id: Uuid,
        success: bool,
        data: Option<Value>,
        error: Option<WireError>,
    },
    /// Cluster-wide event propagation.
    Event {
        name: String,
        data: Value,
    },
}
