use thiserror::Error;

use super::types::PacketError;

/// Errors returned to callers of the medium.
///
/// Only caller misuse surfaces here; loss, expiry and unknown recipients are
/// reported through statistics, logs and monitor events instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediumError {
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),
}
