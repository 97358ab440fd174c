//! Message types exchanged with network-attached input agents.
//!
//! Every message body starts with the sender's hostname so a receiver can
//! attribute a datagram without looking at the socket address.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// `[msg_type:1][payload_len:4]`.
pub const HEADER_SIZE: usize = 5;

/// Largest payload a single UDP datagram can carry.
pub const MAX_PAYLOAD_SIZE: usize = 65_507 - HEADER_SIZE;

/// Default agent UDP port.
pub const DEFAULT_AGENT_PORT: u16 = 8090;

// ── Message type codes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    HeartbeatRequest = 0,
    HeartbeatResponse = 1,
    DescriptorRequest = 2,
    DescriptorResponse = 3,
    Output = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    Input = 7,
    BindStart = 8,
    BindStop = 9,
    BindResponse = 10,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageType::HeartbeatRequest),
            1 => Ok(MessageType::HeartbeatResponse),
            2 => Ok(MessageType::DescriptorRequest),
            3 => Ok(MessageType::DescriptorResponse),
            4 => Ok(MessageType::Output),
            5 => Ok(MessageType::Subscribe),
            6 => Ok(MessageType::Unsubscribe),
            7 => Ok(MessageType::Input),
            8 => Ok(MessageType::BindStart),
            9 => Ok(MessageType::BindStop),
            10 => Ok(MessageType::BindResponse),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

// ── Payload structs ───────────────────────────────────────────────────────────

/// The four value groups an agent exposes, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoCategory {
    Button,
    Axis,
    Delta,
    Event,
}

/// One named input or output on an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoDescriptor {
    pub name: String,
    /// Agent-side index, echoed back in bind responses.
    pub index: u32,
}

impl IoDescriptor {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

/// Capability lists for one direction (input or output).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDescriptor {
    pub buttons: Vec<IoDescriptor>,
    pub axes: Vec<IoDescriptor>,
    pub deltas: Vec<IoDescriptor>,
    pub events: Vec<IoDescriptor>,
}

impl ReportDescriptor {
    pub fn list(&self, category: IoCategory) -> &[IoDescriptor] {
        match category {
            IoCategory::Button => &self.buttons,
            IoCategory::Axis => &self.axes,
            IoCategory::Delta => &self.deltas,
            IoCategory::Event => &self.events,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty() && self.axes.is_empty() && self.deltas.is_empty() && self.events.is_empty()
    }
}

/// Payload of [`MessageType::DescriptorResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorMessage {
    pub hostname: String,
    pub input: ReportDescriptor,
    pub output: ReportDescriptor,
}

/// Values positioned like the matching [`ReportDescriptor`] lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoValues {
    pub buttons: Vec<i16>,
    pub axes: Vec<i16>,
    pub deltas: Vec<i16>,
    pub events: Vec<i16>,
}

impl IoValues {
    /// All-zero values shaped after `descriptor`.
    pub fn zeroed(descriptor: &ReportDescriptor) -> Self {
        Self {
            buttons: vec![0; descriptor.buttons.len()],
            axes: vec![0; descriptor.axes.len()],
            deltas: vec![0; descriptor.deltas.len()],
            events: vec![0; descriptor.events.len()],
        }
    }

    pub fn list(&self, category: IoCategory) -> &[i16] {
        match category {
            IoCategory::Button => &self.buttons,
            IoCategory::Axis => &self.axes,
            IoCategory::Delta => &self.deltas,
            IoCategory::Event => &self.events,
        }
    }

    fn list_mut(&mut self, category: IoCategory) -> &mut Vec<i16> {
        match category {
            IoCategory::Button => &mut self.buttons,
            IoCategory::Axis => &mut self.axes,
            IoCategory::Delta => &mut self.deltas,
            IoCategory::Event => &mut self.events,
        }
    }
}

/// Payload of [`MessageType::BindResponse`]: the input that moved while the
/// agent was in bind mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResponseMessage {
    pub index: u32,
    pub category: IoCategory,
    pub value: i16,
}

// ── Top-level message enum ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    HeartbeatRequest { hostname: String },
    HeartbeatResponse { hostname: String },
    DescriptorRequest { hostname: String },
    DescriptorResponse(DescriptorMessage),
    Output { hostname: String, values: IoValues },
    Subscribe { hostname: String },
    Unsubscribe { hostname: String },
    Input { hostname: String, values: IoValues },
    BindStart { hostname: String },
    BindStop { hostname: String },
    BindResponse { hostname: String, response: BindResponseMessage },
}

impl AgentMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            AgentMessage::HeartbeatRequest { .. } => MessageType::HeartbeatRequest,
            AgentMessage::HeartbeatResponse { .. } => MessageType::HeartbeatResponse,
            AgentMessage::DescriptorRequest { .. } => MessageType::DescriptorRequest,
            AgentMessage::DescriptorResponse(_) => MessageType::DescriptorResponse,
            AgentMessage::Output { .. } => MessageType::Output,
            AgentMessage::Subscribe { .. } => MessageType::Subscribe,
            AgentMessage::Unsubscribe { .. } => MessageType::Unsubscribe,
            AgentMessage::Input { .. } => MessageType::Input,
            AgentMessage::BindStart { .. } => MessageType::BindStart,
            AgentMessage::BindStop { .. } => MessageType::BindStop,
            AgentMessage::BindResponse { .. } => MessageType::BindResponse,
        }
    }

    /// The sender's hostname.
    pub fn hostname(&self) -> &str {
        match self {
            AgentMessage::DescriptorResponse(m) => &m.hostname,
            AgentMessage::HeartbeatRequest { hostname }
            | AgentMessage::HeartbeatResponse { hostname }
            | AgentMessage::DescriptorRequest { hostname }
            | AgentMessage::Output { hostname, .. }
            | AgentMessage::Subscribe { hostname }
            | AgentMessage::Unsubscribe { hostname }
            | AgentMessage::Input { hostname, .. }
            | AgentMessage::BindStart { hostname }
            | AgentMessage::BindStop { hostname }
            | AgentMessage::BindResponse { hostname, .. } => hostname,
        }
    }

    /// Telemetry may be delayed behind everything else in a send queue.
    pub fn is_telemetry(&self) -> bool {
        matches!(self, AgentMessage::Output { .. })
    }
}

// ── Output state ──────────────────────────────────────────────────────────────

/// Pending output values for one agent.
///
/// Writes address an output by category and agent-side index; the state maps
/// that to the value's position in the transmitted lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    values: IoValues,
    positions: HashMap<(IoCategory, u32), usize>,
}

impl OutputState {
    pub fn new(descriptor: &ReportDescriptor) -> Self {
        let mut positions = HashMap::new();
        for category in [IoCategory::Button, IoCategory::Axis, IoCategory::Delta, IoCategory::Event] {
            for (position, io) in descriptor.list(category).iter().enumerate() {
                positions.insert((category, io.index), position);
            }
        }
        Self {
            values: IoValues::zeroed(descriptor),
            positions,
        }
    }

    /// Writes `value`.  Deltas accumulate (saturating), everything else is
    /// overwritten.  Returns `false` for an unknown output.
    pub fn set(&mut self, category: IoCategory, index: u32, value: i16) -> bool {
        let Some(&position) = self.positions.get(&(category, index)) else {
            return false;
        };
        let Some(slot) = self.values.list_mut(category).get_mut(position) else {
            return false;
        };
        *slot = match category {
            IoCategory::Delta => slot.saturating_add(value),
            _ => value,
        };
        true
    }

    pub fn values(&self) -> &IoValues {
        &self.values
    }

    /// Returns the values to transmit and resets deltas and events, which are
    /// one-shot.
    pub fn take_for_transmit(&mut self) -> IoValues {
        let out = self.values.clone();
        self.values.deltas.iter_mut().for_each(|v| *v = 0);
        self.values.events.iter_mut().for_each(|v| *v = 0);
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
