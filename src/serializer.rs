//! Frame body serialization.
//!
//! Transit hands every outgoing frame to the configured serializer and runs
//! every incoming buffer back through it. Implementations must round-trip
//! every frame kind unchanged.

use crate::transit::Packet;
#[cfg(test)]
use crate::transit::PacketPayload;

#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

pub trait Serializer: Send + Sync {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, SerializerError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Packet, SerializerError>;
}

/// JSON frame bodies. The default: human-readable and interoperable.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(packet).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Packet, SerializerError> {
        serde_json::from_slice(bytes).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}

/// MessagePack frame bodies, named-field encoding so the tagged payload
/// survives the round trip.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackSerializer;

impl Serializer for MsgpackSerializer {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, SerializerError> {
        rmp_serde::to_vec_named(packet).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Packet, SerializerError> {
        rmp_serde::from_slice(bytes).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}

#[cfg(test)]
fn sample_frames() -> Vec<Packet> {
    use crate::error::BrokerError;
    use crate::registry::{ActionInfo, ServiceInfo};
    use serde_json::json;
    use uuid::Uuid;

    let id = Uuid::new_v4();
    vec![
        Packet::new("n1", PacketPayload::Discover),
        Packet::new(
            "n1",
            PacketPayload::Info {
                services: vec![ServiceInfo {
                    name: "posts".into(),
                    version: None,
                    settings: json!({}),
                    actions: vec![ActionInfo { name: "posts.find".into(), cache: true }],
                    events: vec!["user.*".into()],
                }],
                ip_list: vec!["10.0.0.5".into()],
                uptime_secs: 42,
            },
        ),
        Packet::new("n1", PacketPayload::Heartbeat { cpu: Some(0.12), uptime_secs: 43 }),
        Packet::new("n1", PacketPayload::Disconnect),
        Packet::new(
            "n1",
            PacketPayload::Request {
                id,
                action: "user.create".into(),
                params: json!({ "x": 1 }),
                meta: json!({ "tenant": "a" }),
                timeout_ms: 5000,
                level: 2,
                parent_id: Some(Uuid::new_v4()),
                request_id: Some(id),
                metrics: true,
            },
        ),
        Packet::new(
            "n2",
            PacketPayload::Response { id, success: true, data: Some(json!([1, 2])), error: None },
        ),
        Packet::new(
            "n2",
            PacketPayload::Response {
                id,
                success: false,
                data: None,
                error: Some(BrokerError::service_not_found("user.create").to_wire("n2")),
            },
        ),
        Packet::new("n1", PacketPayload::Event { name: "user.created".into(), data: json!({}) }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trips_every_frame_kind() {
        let serializer = JsonSerializer;
        for frame in sample_frames() {
            let bytes = serializer.serialize(&frame).unwrap();
            let back = serializer.deserialize(&bytes).unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn msgpack_round_trips_every_frame_kind() {
        let serializer = MsgpackSerializer;
        for frame in sample_frames() {
            let bytes = serializer.serialize(&frame).unwrap();
            let back = serializer.deserialize(&bytes).unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn garbage_input_reports_a_decode_error() {
        let err = JsonSerializer.deserialize(b"not json").unwrap_err();
        assert!(matches!(err, SerializerError::Decode(_)));
        let err = MsgpackSerializer.deserialize(&[0xc1]).unwrap_err();
        assert!(matches!(err, SerializerError::Decode(_)));
    }
}
