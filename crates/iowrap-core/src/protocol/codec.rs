//! Datagram codec for the agent protocol.
//!
//! Wire format:
//! ```text
//! [msg_type:1][payload_len:4][payload:N]
//! ```
//! `payload_len` is big-endian.  The payload is the bincode encoding of the
//! message body, whose first field is always the sender's hostname.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::messages::{
    AgentMessage, BindResponseMessage, DescriptorMessage, IoValues, MessageType, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte is not a recognized value.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The header's payload length does not match the data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The encoded payload does not fit in one datagram.
    #[error("payload of {size} bytes exceeds the {max} byte datagram limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload could not be (de)serialized.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `msg` into one datagram.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails or the result would not
/// fit in a datagram.
pub fn encode_message(msg: &AgentMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(msg.message_type() as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one message from the start of `bytes`.
///
/// Returns the message and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
///
/// # Examples
///
/// ```rust
/// use iowrap_core::protocol::{decode_message, encode_message, AgentMessage};
///
/// let original = AgentMessage::Subscribe { hostname: "esp-1".to_string() };
/// let bytes = encode_message(&original).unwrap();
/// let (decoded, n) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, original);
/// assert_eq!(n, bytes.len());
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<(AgentMessage, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let msg_type = MessageType::try_from(bytes[0])?;
    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(msg_type, payload)?;
    Ok((msg, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn encode_payload(msg: &AgentMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        AgentMessage::HeartbeatRequest { hostname }
        | AgentMessage::HeartbeatResponse { hostname }
        | AgentMessage::DescriptorRequest { hostname }
        | AgentMessage::Subscribe { hostname }
        | AgentMessage::Unsubscribe { hostname }
        | AgentMessage::BindStart { hostname }
        | AgentMessage::BindStop { hostname } => to_bytes(hostname),
        AgentMessage::DescriptorResponse(m) => to_bytes(m),
        AgentMessage::Output { hostname, values } | AgentMessage::Input { hostname, values } => {
            to_bytes(&(hostname, values))
        }
        AgentMessage::BindResponse { hostname, response } => to_bytes(&(hostname, response)),
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn from_bytes<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<AgentMessage, ProtocolError> {
    let msg = match msg_type {
        MessageType::HeartbeatRequest => AgentMessage::HeartbeatRequest { hostname: from_bytes(payload)? },
        MessageType::HeartbeatResponse => AgentMessage::HeartbeatResponse { hostname: from_bytes(payload)? },
        MessageType::DescriptorRequest => AgentMessage::DescriptorRequest { hostname: from_bytes(payload)? },
        MessageType::DescriptorResponse => {
            AgentMessage::DescriptorResponse(from_bytes::<DescriptorMessage>(payload)?)
        }
        MessageType::Output => {
            let (hostname, values) = from_bytes::<(String, IoValues)>(payload)?;
            AgentMessage::Output { hostname, values }
        }
        MessageType::Subscribe => AgentMessage::Subscribe { hostname: from_bytes(payload)? },
        MessageType::Unsubscribe => AgentMessage::Unsubscribe { hostname: from_bytes(payload)? },
        MessageType::Input => {
            let (hostname, values) = from_bytes::<(String, IoValues)>(payload)?;
            AgentMessage::Input { hostname, values }
        }
        MessageType::BindStart => AgentMessage::BindStart { hostname: from_bytes(payload)? },
        MessageType::BindStop => AgentMessage::BindStop { hostname: from_bytes(payload)? },
        MessageType::BindResponse => {
            let (hostname, response) = from_bytes::<(String, BindResponseMessage)>(payload)?;
            AgentMessage::BindResponse { hostname, response }
        }
    };
    Ok(msg)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
