//! Per-node receive path.
//!
//! A [`ReceiverEndpoint`] filters inbound packets by recipient, simulates
//! loss, acknowledges reliable packets, suppresses duplicates and queues the
//! payloads for dispatch to the owner's [`MessageRouter`].
//!
//! Order of checks in [`ReceiverEndpoint::receive`]:
//! 1. recipient mismatch: ignored
//! 2. acknowledgement: handed back to the medium untouched
//! 3. simulated loss: discarded, not acknowledged, not recorded
//! 4. inbox full: discarded the same way, counted as overflow
//! 5. acknowledgement synthesized for reliable packets (before dedup, so a
//!    retransmission whose first ACK was lost still gets confirmed)
//! 6. duplicate sequence number: stop
//! 7. recorded and queued

use embassy_time::Instant;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::geometry::Position;
use super::processor::PacketProcessor;
use super::router::{HandlerContext, MessageRouter, OutgoingMessage};
use super::types::{Address, Packet, PacketId};
use crate::control::config::MediumConfig;

pub const DEFAULT_DEDUP_WINDOW: usize = 1024;
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Sliding window over the last `capacity` sequence numbers of one sender.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    order: VecDeque<u64>,
    seen: HashSet<u64>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(64)),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, sequence_number: u64) -> bool {
        self.seen.contains(&sequence_number)
    }

    /// Record `sequence_number`; returns false if it was already in the window.
    pub fn insert(&mut self, sequence_number: u64) -> bool {
        if !self.seen.insert(sequence_number) {
            return false;
        }
        self.order.push_back(sequence_number);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Result of offering a packet to an endpoint.
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    /// Addressed to someone else.
    Ignored,
    /// Acknowledgement for `packet_id` from `from`, to be settled by the medium.
    Ack { packet_id: PacketId, from: Address },
    /// Dropped by the loss draw.
    Lost,
    /// Dropped because the inbox was full.
    Overflow,
    /// First copy, queued for dispatch.
    Accepted { ack: Option<Packet> },
    /// Already seen, re-acknowledged if reliable.
    Duplicate { ack: Option<Packet> },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointStats {
    pub received: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub overflowed: u64,
    pub dispatched: u64,
    pub acks_sent: u64,
    pub dispatched_by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
struct InboxEntry {
    packet: Arc<Packet>,
    enqueued_at: Instant,
}

#[derive(Debug)]
pub struct ReceiverEndpoint {
    address: Address,
    pub position: Position,
    drop_probability: f32,
    dedup_capacity: usize,
    dedup: HashMap<Address, DedupWindow>,
    inbox: VecDeque<InboxEntry>,
    inbox_capacity: usize,
    processor: Option<PacketProcessor>,
    router: MessageRouter,
    stats: EndpointStats,
    pub log_received_packets: bool,
}

impl ReceiverEndpoint {
    pub fn new(address: impl Into<Address>, position: Position) -> Self {
        Self {
            address: address.into(),
            position,
            drop_probability: 0.0,
            dedup_capacity: DEFAULT_DEDUP_WINDOW,
            dedup: HashMap::new(),
            inbox: VecDeque::new(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            processor: None,
            router: MessageRouter::new(),
            stats: EndpointStats::default(),
            log_received_packets: false,
        }
    }

    /// Endpoint using the medium-wide dedup window and inbox size.
    pub fn from_config(address: impl Into<Address>, position: Position, config: &MediumConfig) -> Self {
        Self::new(address, position).with_dedup_window(config.dedup_window).with_inbox_capacity(config.default_inbox_capacity)
    }

    pub fn with_drop_probability(mut self, drop_probability: f32) -> Self {
        self.set_drop_probability(drop_probability);
        self
    }

    pub fn with_dedup_window(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity.max(1);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn with_processor(mut self, processor: PacketProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_router(mut self, router: MessageRouter) -> Self {
        self.router = router;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn drop_probability(&self) -> f32 {
        self.drop_probability
    }

    /// Clamped to [0, 1]; NaN disables loss.
    pub fn set_drop_probability(&mut self, drop_probability: f32) {
        self.drop_probability = if drop_probability.is_nan() { 0.0 } else { drop_probability.clamp(0.0, 1.0) };
    }

    pub fn router_mut(&mut self) -> &mut MessageRouter {
        &mut self.router
    }

    pub fn processor(&self) -> Option<&PacketProcessor> {
        self.processor.as_ref()
    }

    pub fn processor_mut(&mut self) -> Option<&mut PacketProcessor> {
        self.processor.as_mut()
    }

    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    pub fn clear_statistics(&mut self) {
        self.stats = EndpointStats::default();
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
    }

    pub fn has_processed(&self, sender: &Address, sequence_number: u64) -> bool {
        self.dedup.get(sender).is_some_and(|window| window.contains(sequence_number))
    }

    pub fn receive<R: Rng + ?Sized>(&mut self, packet: &Arc<Packet>, now: Instant, ack_enabled: bool, rng: &mut R) -> ReceiveOutcome {
        if !packet.is_for_recipient(&self.address) {
            log::trace!("[{}] Ignored packet for: {}", self.address, packet.recipient);
            return ReceiveOutcome::Ignored;
        }

        if let Some(packet_id) = packet.ack_for {
            return ReceiveOutcome::Ack {
                packet_id,
                from: packet.sender.clone(),
            };
        }

        if self.drop_probability > 0.0 && rng.r#gen::<f32>() < self.drop_probability {
            self.stats.lost += 1;
            log::debug!("[{}] Simulated loss of {}", self.address, packet);
            return ReceiveOutcome::Lost;
        }

        if self.inbox.len() >= self.inbox_capacity {
            self.stats.overflowed += 1;
            log::debug!("[{}] Inbox full ({}), dropping {}", self.address, self.inbox_capacity, packet);
            return ReceiveOutcome::Overflow;
        }

        let ack = if packet.requires_ack && ack_enabled {
            self.stats.acks_sent += 1;
            Some(Packet::acknowledgement(packet, &self.address))
        } else {
            None
        };

        if let Some(sequence_number) = packet.sequence_number {
            let capacity = self.dedup_capacity;
            let window = self.dedup.entry(packet.sender.clone()).or_insert_with(|| DedupWindow::new(capacity));
            if !window.insert(sequence_number) {
                self.stats.duplicates += 1;
                log::debug!("[{}] Duplicate #{} from {}", self.address, sequence_number, packet.sender);
                return ReceiveOutcome::Duplicate { ack };
            }
        }

        self.stats.received += 1;
        if self.log_received_packets {
            log::info!("[{}] Received: {}", self.address, packet);
        }
        self.inbox.push_back(InboxEntry {
            packet: packet.clone(),
            enqueued_at: now,
        });
        ReceiveOutcome::Accepted { ack }
    }

    /// Hand queued payloads to the router in FIFO order.
    ///
    /// Without a processor the whole inbox is drained; with one only the
    /// packets whose service completes by `now`. Returns the packets together
    /// with any replies their handlers produced.
    pub fn dispatch_ready(&mut self, now: Instant) -> Vec<(Arc<Packet>, Option<OutgoingMessage>)> {
        let mut dispatched = Vec::new();
        while let Some(entry) = self.inbox.front() {
            if let Some(processor) = self.processor.as_mut() {
                if !processor.complete(entry.enqueued_at, now) {
                    break;
                }
            }
            let Some(entry) = self.inbox.pop_front() else {
                break;
            };
            let context = HandlerContext {
                address: self.address.clone(),
                position: self.position,
                now,
            };
            let reply = self.router.dispatch(&entry.packet, &context);
            self.stats.dispatched += 1;
            *self.stats.dispatched_by_type.entry(entry.packet.message_type.clone()).or_insert(0) += 1;
            dispatched.push((entry.packet, reply));
        }
        dispatched
    }
}
