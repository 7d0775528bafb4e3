//! Type definitions for the simulated transport.
//!
//! Contains the packet envelope and the addressing types shared by the
//! medium, the receiver endpoints and the acknowledgement trackers.

use embassy_time::Instant;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Recipient aliases that expand to every registered receiver.
pub const BROADCAST_ADDRESSES: [&str; 2] = ["broadcast", "all"];

/// Reserved message type carried by acknowledgement packets.
pub const ACK_MESSAGE_TYPE: &str = "ack";

/// Address of a node on the medium.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The `"broadcast"` alias.
    pub fn broadcast() -> Self {
        Self(BROADCAST_ADDRESSES[0].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `"broadcast"` and `"all"`.
    pub fn is_broadcast(&self) -> bool {
        BROADCAST_ADDRESSES.contains(&self.0.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Globally unique packet identifier, assigned when the packet is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(Uuid);

impl PacketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PacketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a packet is rejected before it reaches the medium.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet {0} has an empty sender address")]
    EmptySender(PacketId),

    #[error("packet {0} has an empty recipient address")]
    EmptyRecipient(PacketId),

    #[error("packet {0} has an empty message type")]
    EmptyMessageType(PacketId),

    #[error("acknowledgement {0} does not reference the packet it confirms")]
    MissingAckReference(PacketId),

    #[error("acknowledgement {0} must not itself require an acknowledgement")]
    AckRequiresAck(PacketId),

    #[error("acknowledgement {0} is addressed to a broadcast alias")]
    BroadcastAck(PacketId),
}

/// Message envelope moved by the medium.
///
/// The payload is opaque to the transport. The sequence number is stamped by
/// the medium at send time, except on acknowledgements, which carry the
/// sequence number of the packet they confirm.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: PacketId,
    pub sequence_number: Option<u64>,
    /// Simulation time of the (first) send.
    pub timestamp: Instant,
    pub sender: Address,
    pub recipient: Address,
    pub message_type: String,
    pub data: String,
    pub requires_ack: bool,
    /// Set only on acknowledgements.
    pub ack_for: Option<PacketId>,
}

impl Packet {
    pub fn new(sender: impl Into<Address>, recipient: impl Into<Address>, message_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: PacketId::new(),
            sequence_number: None,
            timestamp: Instant::from_ticks(0),
            sender: sender.into(),
            recipient: recipient.into(),
            message_type: message_type.into(),
            data: data.into(),
            requires_ack: false,
            ack_for: None,
        }
    }

    /// Mark the packet as reliable.
    pub fn with_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    /// Build the acknowledgement `from` sends back for `original`.
    pub fn acknowledgement(original: &Packet, from: &Address) -> Self {
        Self {
            id: PacketId::new(),
            sequence_number: original.sequence_number,
            timestamp: original.timestamp,
            sender: from.clone(),
            recipient: original.sender.clone(),
            message_type: ACK_MESSAGE_TYPE.to_string(),
            data: String::new(),
            requires_ack: false,
            ack_for: Some(original.id),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.ack_for.is_some() || self.message_type == ACK_MESSAGE_TYPE
    }

    /// Exact address match or a broadcast alias.
    pub fn is_for_recipient(&self, address: &Address) -> bool {
        self.recipient == *address || self.recipient.is_broadcast()
    }

    /// Reject envelopes the medium must not schedule.
    pub fn validate(&self) -> Result<(), PacketError> {
        if self.sender.is_empty() {
            return Err(PacketError::EmptySender(self.id));
        }
        if self.recipient.is_empty() {
            return Err(PacketError::EmptyRecipient(self.id));
        }
        if self.message_type.trim().is_empty() {
            return Err(PacketError::EmptyMessageType(self.id));
        }
        if self.is_ack() {
            if self.ack_for.is_none() {
                return Err(PacketError::MissingAckReference(self.id));
            }
            if self.requires_ack {
                return Err(PacketError::AckRequiresAck(self.id));
            }
            if self.recipient.is_broadcast() {
                return Err(PacketError::BroadcastAck(self.id));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seq = self.sequence_number.map_or_else(|| "-".to_string(), |s| s.to_string());
        write!(
            f,
            "Packet[{}] #{} from:{} to:{} type:{} @{:.3}s",
            self.id,
            seq,
            self.sender,
            self.recipient,
            self.message_type,
            self.timestamp.as_micros() as f64 / 1_000_000.0
        )
    }
}
