//! Simulated broadcast transport.
//!
//! ## Module Organization
//!
//! - `types`: packet envelope and addressing
//! - `geometry`: positions and distances
//! - `signal_calculations`: propagation delay and ack timeout derivation
//! - `clock` / `schedule`: injected simulated time and the delivery queue
//! - `ack`: per-packet acknowledgement tracking
//! - `processor` / `router` / `receiver`: the endpoint side of the medium
//! - `monitor`: observer events and the packet console
//! - `network`: the [`BroadcastMedium`] coordinating everything above

pub mod ack;
pub mod clock;
pub mod error;
pub mod geometry;
pub mod monitor;
pub mod network;
pub mod processor;
pub mod receiver;
pub mod router;
pub mod schedule;
pub mod signal_calculations;
pub mod stats;
pub mod types;

pub use ack::{AckState, AckTracker};
pub use clock::{Clock, SimClock};
pub use error::MediumError;
pub use geometry::Position;
pub use monitor::{MediumEvent, MonitorChannel, PacketConsole};
pub use network::BroadcastMedium;
pub use processor::{PacketProcessor, ProcessingMethod, ProcessingRates};
pub use receiver::{ReceiveOutcome, ReceiverEndpoint};
pub use router::{HandlerContext, MessageRouter, OutgoingMessage};
pub use stats::MediumStats;
pub use types::{Address, Packet, PacketError, PacketId};
