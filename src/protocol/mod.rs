//! Wire protocol: framing, version negotiation and API versions

pub mod framing;
pub mod negotiation;
pub mod v1;

pub use framing::{encode_frame, FrameDecoder};
pub use negotiation::{negotiate, supported_versions};

use serde_json::Value;

use crate::conversation::Conversation;
use crate::error::ProtocolError;

/// Create a conversation speaking the given API version
pub fn create_conversation(version: u32, id: i64) -> Option<Box<dyn Conversation>> {
    match version {
        1 => Some(Box::new(v1::V1Conversation::new(id))),
        _ => None,
    }
}

/// Conversation ID of a post-negotiation packet
pub fn conversation_id(packet: &Value) -> Result<i64, ProtocolError> {
    let packet = packet.as_object().ok_or(ProtocolError::NotAnObject)?;
    packet
        .get("id")
        .and_then(Value::as_i64)
        .ok_or(ProtocolError::MissingId)
}

fn field<'a>(
    packet: &'a Value,
    name: &'static str,
    expected: &'static str,
) -> Result<&'a Value, ProtocolError> {
    packet.get(name).ok_or(ProtocolError::BadField {
        field: name,
        expected,
    })
}

pub(crate) fn u32_field(packet: &Value, name: &'static str) -> Result<u32, ProtocolError> {
    const EXPECTED: &str = "unsigned integer";
    field(packet, name, EXPECTED)?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(ProtocolError::BadField {
            field: name,
            expected: EXPECTED,
        })
}

pub(crate) fn str_field<'a>(packet: &'a Value, name: &'static str) -> Result<&'a str, ProtocolError> {
    const EXPECTED: &str = "string";
    field(packet, name, EXPECTED)?
        .as_str()
        .ok_or(ProtocolError::BadField {
            field: name,
            expected: EXPECTED,
        })
}

pub(crate) fn bool_field(packet: &Value, name: &'static str) -> Result<bool, ProtocolError> {
    const EXPECTED: &str = "boolean";
    field(packet, name, EXPECTED)?
        .as_bool()
        .ok_or(ProtocolError::BadField {
            field: name,
            expected: EXPECTED,
        })
}

pub(crate) fn f64_field(packet: &Value, name: &'static str) -> Result<f64, ProtocolError> {
    const EXPECTED: &str = "number";
    field(packet, name, EXPECTED)?
        .as_f64()
        .ok_or(ProtocolError::BadField {
            field: name,
            expected: EXPECTED,
        })
}
