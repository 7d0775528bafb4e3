//! Broadcast medium driving the transport timeline.
//!
//! High-level flow of one [`BroadcastMedium::advance`]:
//! 1) Release every scheduled delivery whose due time has passed, in
//!    (due time, insertion order). Acknowledgements settle their tracker,
//!    everything else goes through the target endpoint's receive path.
//! 2) Walk the outstanding acknowledgement trackers: retransmit to the
//!    receivers that have not confirmed yet, expire trackers that used up
//!    their retries.
//! 3) Drain endpoint inboxes into their routers and send the replies.
//!
//! The medium is an explicit context object. It owns the endpoints, the
//! position registry, the delivery schedule and the trackers, and all of them
//! change only through its methods. Time comes from an injected [`Clock`].

use embassy_time::Instant;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::ack::AckTracker;
use super::clock::{Clock, SimClock};
use super::error::MediumError;
use super::geometry::{Position, distance};
use super::monitor::{DropReason, MediumEvent, MonitorChannel};
use super::receiver::{ReceiveOutcome, ReceiverEndpoint};
use super::schedule::DeliverySchedule;
use super::signal_calculations::{calculate_ack_timeout, calculate_jittered_delay};
use super::stats::MediumStats;
use super::types::{Address, Packet, PacketId};
use crate::control::config::MediumConfig;

pub struct BroadcastMedium<C: Clock = SimClock> {
    config: MediumConfig,
    clock: C,
    /// Stand-in position for senders the medium has never heard of.
    reference_position: Position,
    receivers: BTreeMap<Address, ReceiverEndpoint>,
    address_positions: HashMap<Address, Position>,
    schedule: DeliverySchedule,
    pending_acks: HashMap<PacketId, AckTracker>,
    next_sequence_number: u64,
    stats: MediumStats,
    rng: StdRng,
    subscribers: Vec<Arc<MonitorChannel>>,
}

impl BroadcastMedium<SimClock> {
    /// Medium on a fresh [`SimClock`] starting at tick zero.
    pub fn with_sim_clock(config: MediumConfig) -> Self {
        Self::new(config, SimClock::new())
    }
}

impl<C: Clock> BroadcastMedium<C> {
    pub fn new(config: MediumConfig, clock: C) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            clock,
            reference_position: Position::ORIGIN,
            receivers: BTreeMap::new(),
            address_positions: HashMap::new(),
            schedule: DeliverySchedule::new(),
            pending_acks: HashMap::new(),
            next_sequence_number: 0,
            stats: MediumStats::default(),
            rng,
            subscribers: Vec::new(),
        }
    }

    pub fn with_reference_position(mut self, position: Position) -> Self {
        self.reference_position = position;
        self
    }

    pub fn config(&self) -> &MediumConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    // ----- registry -----

    /// Add an endpoint. Returns false (and keeps the existing one) if the address is taken.
    pub fn register_receiver(&mut self, endpoint: ReceiverEndpoint) -> bool {
        let address = endpoint.address().clone();
        if self.receivers.contains_key(&address) {
            log::debug!("Receiver {} already registered", address);
            return false;
        }
        self.address_positions.insert(address.clone(), endpoint.position);
        self.receivers.insert(address.clone(), endpoint);
        log::info!("Registered receiver: {} (total: {})", address, self.receivers.len());
        true
    }

    /// Remove an endpoint. Deliveries already in flight to it are dropped when they come due.
    pub fn unregister_receiver(&mut self, address: &Address) -> Option<ReceiverEndpoint> {
        let endpoint = self.receivers.remove(address)?;
        self.address_positions.remove(address);
        log::info!("Unregistered receiver: {} (total: {})", address, self.receivers.len());
        Some(endpoint)
    }

    /// Make a send-only address known so its packets start from the right place.
    pub fn register_sender(&mut self, address: impl Into<Address>, position: Position) -> bool {
        let address = address.into();
        if self.address_positions.contains_key(&address) {
            return false;
        }
        log::debug!("Registered sender: {}", address);
        self.address_positions.insert(address, position);
        true
    }

    /// Forget a send-only address. Receivers keep their position.
    pub fn unregister_sender(&mut self, address: &Address) -> bool {
        if self.receivers.contains_key(address) {
            return false;
        }
        self.address_positions.remove(address).is_some()
    }

    /// Record the owner's latest position; unknown addresses become senders.
    pub fn update_position(&mut self, address: &Address, position: Position) {
        if let Some(endpoint) = self.receivers.get_mut(address) {
            endpoint.position = position;
        }
        self.address_positions.insert(address.clone(), position);
    }

    pub fn position_of(&self, address: &Address) -> Option<Position> {
        self.address_positions.get(address).copied()
    }

    pub fn receiver(&self, address: &Address) -> Option<&ReceiverEndpoint> {
        self.receivers.get(address)
    }

    pub fn receiver_mut(&mut self, address: &Address) -> Option<&mut ReceiverEndpoint> {
        self.receivers.get_mut(address)
    }

    /// Endpoints in address order.
    pub fn receivers(&self) -> impl Iterator<Item = &ReceiverEndpoint> {
        self.receivers.values()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.len()
    }

    pub fn pending_ack(&self, packet_id: &PacketId) -> Option<&AckTracker> {
        self.pending_acks.get(packet_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.schedule.len()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.schedule.next_due()
    }

    pub fn stats(&self) -> MediumStats {
        self.stats
    }

    /// Reset medium and endpoint counters. In-flight state is untouched.
    pub fn clear_statistics(&mut self) {
        self.stats = MediumStats::default();
        for endpoint in self.receivers.values_mut() {
            endpoint.clear_statistics();
        }
    }

    /// New event stream of this medium. Every subscriber gets its own copy of
    /// each event; dropping the returned channel unsubscribes.
    pub fn subscribe(&mut self) -> Arc<MonitorChannel> {
        let channel = Arc::new(MonitorChannel::new());
        self.subscribers.push(channel.clone());
        channel
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|channel| Arc::strong_count(channel) > 1).count()
    }

    // ----- sending -----

    /// Application write entry point.
    pub fn send_message(
        &mut self,
        sender: impl Into<Address>,
        recipient: impl Into<Address>,
        message_type: impl Into<String>,
        payload: impl Into<String>,
        requires_ack: bool,
    ) -> Result<PacketId, MediumError> {
        let mut packet = Packet::new(sender, recipient, message_type, payload);
        packet.requires_ack = requires_ack;
        self.send(packet)
    }

    /// Put a packet on the medium at the current clock time.
    ///
    /// # Returns
    ///
    /// The packet id, or `MediumError::InvalidPacket` when the envelope is
    /// malformed, in which case nothing is scheduled.
    pub fn send(&mut self, packet: Packet) -> Result<PacketId, MediumError> {
        let now = self.clock.now();
        self.send_at(packet, now)
    }

    fn send_at(&mut self, mut packet: Packet, now: Instant) -> Result<PacketId, MediumError> {
        packet.validate()?;

        if packet.sequence_number.is_none() {
            packet.sequence_number = Some(self.next_sequence_number);
            self.next_sequence_number += 1;
        }
        packet.timestamp = now;
        let packet_id = packet.id;
        let sender_position = self.sender_position(&packet.sender);
        let packet = Arc::new(packet);
        self.stats.sent += 1;

        if self.config.log_all_packets {
            log::debug!("Send: {}", packet);
        }

        if packet.is_ack() {
            self.schedule_ack(&packet, sender_position, now);
            self.stats.acks_sent += 1;
            self.publish(MediumEvent::Sent {
                packet,
                recipients: 1,
                at: now,
            });
            return Ok(packet_id);
        }

        let targets: Vec<Address> = self.receivers.keys().filter(|address| packet.is_for_recipient(address)).cloned().collect();
        if targets.is_empty() {
            log::warn!("No receivers matched recipient {} for {}", packet.recipient, packet);
            self.publish(MediumEvent::Sent {
                packet,
                recipients: 0,
                at: now,
            });
            return Ok(packet_id);
        }

        let mut max_distance = 0.0_f32;
        for target in &targets {
            if let Some(distance) = self.schedule_delivery(&packet, target, sender_position, now) {
                max_distance = max_distance.max(distance);
            }
        }

        if packet.requires_ack && self.config.ack_enabled {
            let timeout = calculate_ack_timeout(max_distance, &self.config);
            log::debug!(
                "Tracking {} for {} receivers, timeout {:.3}s",
                packet_id,
                targets.len(),
                timeout.as_micros() as f64 / 1_000_000.0
            );
            self.stats.tracked += targets.len() as u64;
            let tracker = AckTracker::new(packet.clone(), targets.iter().cloned(), now, timeout, self.config.max_retries, self.config.retry_backoff);
            self.pending_acks.insert(packet_id, tracker);
        }

        self.publish(MediumEvent::Sent {
            packet,
            recipients: targets.len(),
            at: now,
        });
        Ok(packet_id)
    }

    fn sender_position(&self, sender: &Address) -> Position {
        match self.address_positions.get(sender) {
            Some(position) => *position,
            None => {
                log::warn!("Unknown sender position for {}, using reference position", sender);
                self.reference_position
            }
        }
    }

    /// Schedule one copy of `packet` towards `target`. Returns the distance, or
    /// `None` when the target is not registered.
    fn schedule_delivery(&mut self, packet: &Arc<Packet>, target: &Address, sender_position: Position, now: Instant) -> Option<f32> {
        let receiver_position = self.receivers.get(target)?.position;
        let distance = distance(&sender_position, &receiver_position);
        let delay = calculate_jittered_delay(distance, &self.config, &mut self.rng);
        if self.config.log_all_packets {
            log::debug!("Scheduled #{:?} to {} at +{}us ({:.1} m)", packet.sequence_number, target, delay.as_micros(), distance);
        }
        self.schedule.push(now + delay, packet.clone(), Some(target.clone()), distance);
        Some(distance)
    }

    /// Acknowledgements travel back over the same medium but are never fanned
    /// out or tracked.
    fn schedule_ack(&mut self, ack: &Arc<Packet>, sender_position: Position, now: Instant) {
        let recipient_position = match self.address_positions.get(&ack.recipient) {
            Some(position) => *position,
            None => self.reference_position,
        };
        let distance = distance(&sender_position, &recipient_position);
        let delay = calculate_jittered_delay(distance, &self.config, &mut self.rng);
        self.schedule.push(now + delay, ack.clone(), None, distance);
    }

    // ----- acknowledgements -----

    /// Confirm `receiver` for `packet_id`.
    ///
    /// Returns true when the receiver was still pending. Unknown packets and
    /// repeated confirmations are no-ops.
    pub fn receive_ack(&mut self, packet_id: PacketId, receiver: &Address) -> bool {
        let now = self.clock.now();
        self.settle_ack(packet_id, receiver, now)
    }

    fn settle_ack(&mut self, packet_id: PacketId, receiver: &Address, now: Instant) -> bool {
        let Some(tracker) = self.pending_acks.get_mut(&packet_id) else {
            log::trace!("Ignoring ack for unknown packet {} from {}", packet_id, receiver);
            return false;
        };
        if !tracker.confirm(receiver) {
            log::trace!("Ignoring repeated ack for {} from {}", packet_id, receiver);
            return false;
        }
        let complete = tracker.is_acknowledged();
        self.stats.acked += 1;
        self.publish(MediumEvent::AckReceived {
            packet_id,
            from: receiver.clone(),
            at: now,
        });
        if complete {
            self.pending_acks.remove(&packet_id);
            log::debug!("Packet {} fully acknowledged", packet_id);
            self.publish(MediumEvent::Acknowledged { packet_id, at: now });
        }
        true
    }

    // ----- timeline -----

    /// [`advance`](Self::advance) to the clock's current time.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.advance(now);
    }

    /// Process everything that is due at `now`.
    pub fn advance(&mut self, now: Instant) {
        self.deliver_due(now);
        self.process_pending_acks(now);
        self.dispatch_inboxes(now);
    }

    fn deliver_due(&mut self, now: Instant) {
        while let Some(delivery) = self.schedule.pop_due(now) {
            match delivery.target {
                None => match delivery.packet.ack_for {
                    Some(packet_id) => {
                        self.settle_ack(packet_id, &delivery.packet.sender, now);
                    }
                    None => log::error!("Untargeted delivery that is not an ack: {}", delivery.packet),
                },
                Some(target) => self.deliver_to(&target, &delivery.packet, now),
            }
        }
    }

    fn deliver_to(&mut self, target: &Address, packet: &Arc<Packet>, now: Instant) {
        let ack_enabled = self.config.ack_enabled;
        let Some(endpoint) = self.receivers.get_mut(target) else {
            self.stats.stale_deliveries += 1;
            log::debug!("Dropping delivery of {} to unregistered {}", packet, target);
            self.publish(MediumEvent::Dropped {
                packet_id: packet.id,
                to: target.clone(),
                reason: DropReason::Stale,
                at: now,
            });
            return;
        };

        let outcome = endpoint.receive(packet, now, ack_enabled, &mut self.rng);
        let ack = match outcome {
            ReceiveOutcome::Ignored => None,
            ReceiveOutcome::Ack { packet_id, from } => {
                self.settle_ack(packet_id, &from, now);
                None
            }
            ReceiveOutcome::Lost => {
                self.stats.delivered += 1;
                self.stats.lost += 1;
                self.publish_drop(packet.id, target, DropReason::Lost, now);
                None
            }
            ReceiveOutcome::Overflow => {
                self.stats.delivered += 1;
                self.stats.inbox_overflows += 1;
                self.publish_drop(packet.id, target, DropReason::Overflow, now);
                None
            }
            ReceiveOutcome::Accepted { ack } => {
                self.stats.delivered += 1;
                self.publish(MediumEvent::Delivered {
                    packet_id: packet.id,
                    to: target.clone(),
                    at: now,
                });
                ack
            }
            ReceiveOutcome::Duplicate { ack } => {
                self.stats.delivered += 1;
                self.stats.duplicates += 1;
                ack
            }
        };

        if let Some(ack) = ack {
            if let Err(err) = self.send_at(ack, now) {
                log::error!("Failed to send ack from {}: {}", target, err);
            }
        }
    }

    fn process_pending_acks(&mut self, now: Instant) {
        if self.pending_acks.is_empty() {
            return;
        }
        // Sequence order keeps retransmissions deterministic across runs.
        let mut due: Vec<(u64, PacketId)> = self
            .pending_acks
            .iter()
            .map(|(packet_id, tracker)| (tracker.packet.sequence_number.unwrap_or(0), *packet_id))
            .collect();
        due.sort();

        for (_, packet_id) in due {
            if let Some(tracker) = self.pending_acks.get_mut(&packet_id) {
                if tracker.should_retry(now) {
                    tracker.record_retry(now);
                    let packet = tracker.packet.clone();
                    let attempt = tracker.retry_count;
                    let pending: Vec<Address> = tracker.pending_receivers().cloned().collect();
                    self.retransmit(&packet, &pending, attempt, now);
                }
            }

            let exhausted = self.pending_acks.get(&packet_id).is_some_and(|tracker| tracker.has_exhausted_retries());
            if exhausted {
                if let Some(mut tracker) = self.pending_acks.remove(&packet_id) {
                    tracker.expire();
                    self.stats.dropped += 1;
                    let pending: Vec<Address> = tracker.pending_receivers().cloned().collect();
                    log::warn!(
                        "Packet {} expired after {} retries, unacknowledged by: {:?}",
                        tracker.packet,
                        tracker.retry_count,
                        pending.iter().map(Address::as_str).collect::<Vec<_>>()
                    );
                    self.publish(MediumEvent::Expired {
                        packet_id,
                        retries: tracker.retry_count,
                        pending,
                        at: now,
                    });
                }
            }
        }
    }

    /// Resend to the receivers that have not confirmed, from the sender's current position.
    fn retransmit(&mut self, packet: &Arc<Packet>, pending: &[Address], attempt: u32, now: Instant) {
        let sender_position = self.sender_position(&packet.sender);
        let mut scheduled = 0;
        for target in pending {
            if self.schedule_delivery(packet, target, sender_position, now).is_some() {
                scheduled += 1;
            } else {
                log::debug!("Skipping retransmission of {} to unregistered {}", packet.id, target);
            }
        }
        self.stats.retransmitted += 1;
        log::debug!("Retransmitted {} (attempt {}) to {}/{} pending receivers", packet, attempt, scheduled, pending.len());
        self.publish(MediumEvent::Retransmitted {
            packet_id: packet.id,
            attempt,
            pending: pending.len(),
            at: now,
        });
    }

    fn dispatch_inboxes(&mut self, now: Instant) {
        let mut replies = Vec::new();
        for (address, endpoint) in self.receivers.iter_mut() {
            for (packet, reply) in endpoint.dispatch_ready(now) {
                self.stats.dispatched += 1;
                log::trace!("[{}] Dispatched {}", address, packet);
                if let Some(reply) = reply {
                    replies.push((address.clone(), reply));
                }
            }
        }

        for (from, reply) in replies {
            let mut packet = Packet::new(from.clone(), reply.recipient, reply.message_type, reply.data);
            packet.requires_ack = reply.requires_ack;
            if let Err(err) = self.send_at(packet, now) {
                log::warn!("[{}] Reply rejected: {}", from, err);
            }
        }
    }

    // ----- monitor -----

    fn publish(&mut self, event: MediumEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|channel| Arc::strong_count(channel) > 1);
        for channel in &self.subscribers {
            if channel.try_send(event.clone()).is_err() {
                self.stats.monitor_overflows += 1;
            }
        }
    }

    fn publish_drop(&mut self, packet_id: PacketId, to: &Address, reason: DropReason, at: Instant) {
        self.publish(MediumEvent::Dropped {
            packet_id,
            to: to.clone(),
            reason,
            at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::monitor::MediumEvent;
    use crate::simulation::processor::{PacketProcessor, ProcessingMethod, ProcessingRates};
    use crate::simulation::router::OutgoingMessage;
    use embassy_time::Duration;
    use std::sync::Mutex;

    fn config() -> MediumConfig {
        MediumConfig {
            signal_delay_secs: 0.0,
            propagation_speed: 343.0,
            ack_safety_margin_secs: 0.1,
            ..MediumConfig::default()
        }
    }

    /// Controller at the origin, drone A at 10 m and drone B at 100 m.
    fn two_drone_medium(config: MediumConfig) -> BroadcastMedium {
        let mut medium = BroadcastMedium::with_sim_clock(config);
        medium.register_sender("controller", Position::ORIGIN);
        medium.register_receiver(ReceiverEndpoint::new("droneA", Position::new(10.0, 0.0, 0.0)));
        medium.register_receiver(ReceiverEndpoint::new("droneB", Position::new(100.0, 0.0, 0.0)));
        medium
    }

    fn step(medium: &mut BroadcastMedium, until_ms: u64) {
        let start = medium.clock().now().as_millis();
        for ms in start..=until_ms {
            medium.clock().set(Instant::from_millis(ms));
            medium.tick();
        }
    }

    #[test]
    fn idle_medium_does_nothing() {
        let mut medium = two_drone_medium(config());
        step(&mut medium, 1000);
        assert_eq!(medium.stats(), MediumStats::default());
        assert_eq!(medium.scheduled_count(), 0);
        assert_eq!(medium.pending_ack_count(), 0);
    }

    #[test]
    fn deliveries_follow_distance() {
        let mut medium = two_drone_medium(config());
        medium.send_message("controller", "broadcast", "power_on", "", false).unwrap();
        assert_eq!(medium.scheduled_count(), 2);

        medium.advance(Instant::from_micros(29_154));
        assert_eq!(medium.stats().delivered, 0);
        medium.advance(Instant::from_micros(29_155));
        assert_eq!(medium.stats().delivered, 1);
        assert_eq!(medium.receiver(&Address::from("droneA")).unwrap().stats().received, 1);

        medium.advance(Instant::from_micros(291_544));
        assert_eq!(medium.stats().delivered, 1);
        medium.advance(Instant::from_micros(291_545));
        assert_eq!(medium.stats().delivered, 2);
    }

    #[test]
    fn out_of_order_arrival_is_preserved() {
        let mut medium = two_drone_medium(config());
        let monitor = medium.subscribe();
        let far = medium.send_message("controller", "droneB", "set_target", "1,2,3", false).unwrap();
        let near = medium.send_message("controller", "droneA", "set_target", "4,5,6", false).unwrap();
        medium.advance(Instant::from_secs(1));

        let delivered: Vec<PacketId> = std::iter::from_fn(|| monitor.try_receive().ok())
            .filter_map(|event| match event {
                MediumEvent::Delivered { packet_id, .. } => Some(packet_id),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec![near, far]);
    }

    #[test]
    fn sequence_numbers_increase_in_send_order() {
        let mut medium = two_drone_medium(config());
        let monitor = medium.subscribe();
        for _ in 0..3 {
            medium.send_message("controller", "all", "position_report", "", false).unwrap();
        }
        let sequence: Vec<u64> = std::iter::from_fn(|| monitor.try_receive().ok())
            .filter_map(|event| match event {
                MediumEvent::Sent { packet, .. } => packet.sequence_number,
                _ => None,
            })
            .collect();
        assert_eq!(sequence, vec![0, 1, 2]);
    }

    #[test]
    fn broadcast_reaches_every_receiver() {
        let mut medium = BroadcastMedium::with_sim_clock(config());
        medium.register_sender("controller", Position::ORIGIN);
        for i in 0..5 {
            medium.register_receiver(ReceiverEndpoint::new(format!("drone{i}"), Position::new(i as f32 * 3.0, 4.0, 0.0)));
        }
        medium.send_message("controller", "all", "formation_active", "true", false).unwrap();
        assert_eq!(medium.scheduled_count(), 5);
        medium.advance(Instant::from_secs(1));
        assert_eq!(medium.stats().delivered, 5);
        assert!(medium.receivers().all(|endpoint| endpoint.stats().received == 1));
    }

    #[test]
    fn unreliable_packets_are_never_tracked() {
        let mut medium = two_drone_medium(config());
        medium.send_message("controller", "broadcast", "position_report", "", false).unwrap();
        assert_eq!(medium.pending_ack_count(), 0);
        step(&mut medium, 3000);
        assert_eq!(medium.stats().retransmitted, 0);
        assert_eq!(medium.stats().acks_sent, 0);
    }

    #[test]
    fn ack_disabled_skips_tracking() {
        let mut medium = two_drone_medium(MediumConfig {
            ack_enabled: false,
            ..config()
        });
        medium.send_message("controller", "broadcast", "power_off", "", true).unwrap();
        assert_eq!(medium.pending_ack_count(), 0);
        step(&mut medium, 500);
        assert_eq!(medium.stats().acks_sent, 0);
        assert_eq!(medium.stats().delivered, 2);
    }

    #[test]
    fn reliable_broadcast_is_fully_acknowledged() {
        let mut medium = two_drone_medium(config());
        let packet_id = medium.send_message("controller", "broadcast", "formation_offset", "x:2.5,z:3.0", true).unwrap();

        let tracker = medium.pending_ack(&packet_id).unwrap();
        assert_eq!(tracker.pending_count(), 2);
        let expected = 2.0 * 100.0 / 343.0 + 0.1;
        assert!((tracker.timeout.as_micros() as f64 / 1e6 - expected).abs() < 1e-5);

        step(&mut medium, 700);
        assert_eq!(medium.pending_ack_count(), 0);
        assert_eq!(medium.stats().acked, 2);
        assert_eq!(medium.stats().acks_sent, 2);
        assert_eq!(medium.stats().retransmitted, 0);
        assert_eq!(medium.stats().dropped, 0);
    }

    #[test]
    fn silent_receiver_exhausts_retries_and_is_dropped() {
        let mut medium = two_drone_medium(config());
        medium.receiver_mut(&Address::from("droneB")).unwrap().set_drop_probability(1.0);
        let monitor = medium.subscribe();
        let packet_id = medium.send_message("controller", "broadcast", "power_on", "", true).unwrap();

        let mut expired = Vec::new();
        for ms in 0..=5000 {
            medium.clock().set(Instant::from_millis(ms));
            medium.tick();
            while let Ok(event) = monitor.try_receive() {
                if let MediumEvent::Expired { packet_id, pending, .. } = event {
                    expired.push((packet_id, pending));
                }
            }
        }

        let stats = medium.stats();
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.retransmitted, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.lost, 4);
        assert_eq!(medium.pending_ack_count(), 0);
        assert_eq!(expired, vec![(packet_id, vec![Address::from("droneB")])]);
    }

    #[test]
    fn duplicates_are_reacknowledged_but_dispatched_once() {
        // Timeout far below the round trip: every retry lands as a duplicate.
        let mut medium = two_drone_medium(MediumConfig {
            dynamic_ack_timeout: false,
            ack_timeout_secs: 0.05,
            ..config()
        });
        medium.receiver_mut(&Address::from("droneB")).unwrap().router_mut().fallback(|_, _| None);
        medium.send_message("controller", "droneB", "set_target", "1,2,3", true).unwrap();
        step(&mut medium, 1000);

        let droneb = medium.receiver(&Address::from("droneB")).unwrap();
        assert_eq!(droneb.stats().received, 1);
        assert_eq!(droneb.stats().duplicates, 3);
        assert_eq!(droneb.stats().dispatched, 1);
        assert_eq!(droneb.stats().acks_sent, 4);
        assert_eq!(medium.stats().retransmitted, 3);
        assert_eq!(medium.stats().dropped, 1);
        // Every ack arrives after the tracker expired.
        assert_eq!(medium.stats().acked, 0);
    }

    #[test]
    fn every_reliable_send_ends_acknowledged_or_dropped() {
        let mut medium = BroadcastMedium::with_sim_clock(MediumConfig { seed: 9, ..config() });
        medium.register_sender("controller", Position::ORIGIN);
        for i in 0..4 {
            let endpoint = ReceiverEndpoint::new(format!("drone{i}"), Position::new(20.0 * i as f32, 0.0, 0.0)).with_drop_probability(0.5);
            medium.register_receiver(endpoint);
        }
        let monitor = medium.subscribe();
        for i in 0..10 {
            medium.clock().set(Instant::from_millis(i * 10));
            medium.send_message("controller", "broadcast", "checkpoint_reached", i.to_string(), true).unwrap();
            medium.tick();
        }

        let mut finished = 0;
        for ms in 100..=10_000 {
            medium.clock().set(Instant::from_millis(ms));
            medium.tick();
            while let Ok(event) = monitor.try_receive() {
                if matches!(event, MediumEvent::Acknowledged { .. } | MediumEvent::Expired { .. }) {
                    finished += 1;
                }
            }
        }
        assert_eq!(medium.pending_ack_count(), 0);
        assert_eq!(finished, 10);
        assert_eq!(medium.stats().monitor_overflows, 0);
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let mut medium = two_drone_medium(config());
        let console = medium.subscribe();
        let ui = medium.subscribe();
        assert_eq!(medium.subscriber_count(), 2);

        medium.send_message("controller", "droneA", "power_on", "", false).unwrap();
        medium.advance(Instant::from_millis(100));

        let console_events: Vec<MediumEvent> = std::iter::from_fn(|| console.try_receive().ok()).collect();
        let ui_events: Vec<MediumEvent> = std::iter::from_fn(|| ui.try_receive().ok()).collect();
        assert_eq!(console_events.len(), 2);
        assert_eq!(ui_events.len(), 2);
        assert!(matches!(ui_events[0], MediumEvent::Sent { .. }));
        assert!(matches!(ui_events[1], MediumEvent::Delivered { .. }));

        drop(ui);
        medium.send_message("controller", "droneA", "power_off", "", false).unwrap();
        assert_eq!(medium.subscriber_count(), 1);
        assert_eq!(std::iter::from_fn(|| console.try_receive().ok()).count(), 1);
        assert_eq!(medium.stats().monitor_overflows, 0);
    }

    #[test]
    fn unregistered_receiver_delivery_is_skipped() {
        let mut medium = two_drone_medium(config());
        medium.send_message("controller", "broadcast", "power_on", "", false).unwrap();
        medium.advance(Instant::from_millis(100));
        assert_eq!(medium.stats().delivered, 1);

        assert!(medium.unregister_receiver(&Address::from("droneB")).is_some());
        assert!(medium.unregister_receiver(&Address::from("droneB")).is_none());
        medium.advance(Instant::from_secs(1));

        assert_eq!(medium.stats().delivered, 1);
        assert_eq!(medium.stats().stale_deliveries, 1);
        assert_eq!(medium.receiver_count(), 1);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut medium = two_drone_medium(config());
        assert!(!medium.register_receiver(ReceiverEndpoint::new("droneA", Position::ORIGIN)));
        assert_eq!(medium.receiver_count(), 2);
        assert_eq!(medium.position_of(&Address::from("droneA")), Some(Position::new(10.0, 0.0, 0.0)));

        assert!(!medium.register_sender("controller", Position::new(1.0, 0.0, 0.0)));
        assert!(medium.unregister_sender(&Address::from("controller")));
        assert!(!medium.unregister_sender(&Address::from("controller")));
        assert!(!medium.unregister_sender(&Address::from("droneA")));
    }

    #[test]
    fn zero_matches_create_no_tracker() {
        let mut medium = two_drone_medium(config());
        let result = medium.send_message("controller", "droneZ", "power_on", "", true);
        assert!(result.is_ok());
        assert_eq!(medium.pending_ack_count(), 0);
        assert_eq!(medium.scheduled_count(), 0);
        assert_eq!(medium.stats().sent, 1);
    }

    #[test]
    fn malformed_packets_are_rejected() {
        let mut medium = two_drone_medium(config());
        let result = medium.send(Packet::new("", "droneA", "power_on", ""));
        assert!(matches!(result, Err(MediumError::InvalidPacket(_))));
        assert_eq!(medium.scheduled_count(), 0);
        assert_eq!(medium.stats().sent, 0);
    }

    #[test]
    fn late_and_unknown_acks_are_noops() {
        let mut medium = two_drone_medium(config());
        assert!(!medium.receive_ack(PacketId::new(), &Address::from("droneA")));

        let packet_id = medium.send_message("controller", "droneA", "power_on", "", true).unwrap();
        assert!(medium.receive_ack(packet_id, &Address::from("droneA")));
        assert!(!medium.receive_ack(packet_id, &Address::from("droneA")));
        assert_eq!(medium.stats().acked, 1);
        assert_eq!(medium.pending_ack_count(), 0);
    }

    #[test]
    fn unknown_sender_uses_reference_position() {
        let mut medium = BroadcastMedium::with_sim_clock(config()).with_reference_position(Position::new(10.0, 0.0, 0.0));
        medium.register_receiver(ReceiverEndpoint::new("drone1", Position::ORIGIN));
        medium.send_message("ghost", "drone1", "ping", "", false).unwrap();
        assert_eq!(medium.next_due(), Some(Instant::from_micros(29_155)));
    }

    #[test]
    fn position_updates_change_retransmission_delay() {
        let mut medium = two_drone_medium(MediumConfig {
            dynamic_ack_timeout: false,
            ack_timeout_secs: 0.5,
            ..config()
        });
        medium.receiver_mut(&Address::from("droneA")).unwrap().set_drop_probability(1.0);
        medium.send_message("controller", "droneA", "power_on", "", true).unwrap();
        medium.advance(Instant::from_millis(100));

        medium.update_position(&Address::from("droneA"), Position::new(343.0, 0.0, 0.0));
        medium.advance(Instant::from_millis(500));
        assert_eq!(medium.stats().retransmitted, 1);
        assert_eq!(medium.next_due(), Some(Instant::from_millis(1500)));
    }

    #[test]
    fn full_inbox_blocks_ack_until_drained() {
        let mut medium = BroadcastMedium::with_sim_clock(MediumConfig {
            dynamic_ack_timeout: false,
            ack_timeout_secs: 0.4,
            max_retries: 5,
            ..config()
        });
        let slow = PacketProcessor::new(
            ProcessingMethod::StandardDdos,
            ProcessingRates {
                standard_ddos: 1.0,
                ..ProcessingRates::default()
            },
        );
        let mut target = ReceiverEndpoint::new("droneB", Position::new(10.0, 0.0, 0.0)).with_inbox_capacity(1).with_processor(slow);
        target.router_mut().fallback(|_, _| None);
        medium.register_receiver(target);
        medium.register_sender("controller", Position::ORIGIN);
        medium.register_sender("attacker", Position::new(10.0, 0.0, 0.0));

        medium.send_message("attacker", "droneB", "junk_data", "JUNK", false).unwrap();
        medium.send_message("controller", "droneB", "set_target", "1,2,3", true).unwrap();
        step(&mut medium, 2000);

        let stats = medium.stats();
        assert_eq!(stats.inbox_overflows, 3);
        assert_eq!(stats.retransmitted, 3);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(medium.pending_ack_count(), 0);
    }

    #[test]
    fn handler_replies_are_sent_from_endpoint() {
        let mut medium = two_drone_medium(config());
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let seen = inbox.clone();
        let mut controller = ReceiverEndpoint::new("controller", Position::ORIGIN);
        controller.router_mut().on("status_response", move |packet, _| {
            seen.lock().unwrap().push((packet.sender.to_string(), packet.data.clone()));
            None
        });
        medium.register_receiver(controller);
        medium
            .receiver_mut(&Address::from("droneA"))
            .unwrap()
            .router_mut()
            .on("status_request", |packet, ctx| Some(OutgoingMessage::new(packet.sender.clone(), "status_response", format!("{:.2}", ctx.position.x))));

        medium.send_message("controller", "droneA", "status_request", "", false).unwrap();
        step(&mut medium, 200);

        assert_eq!(*inbox.lock().unwrap(), vec![("droneA".to_string(), "10.00".to_string())]);
    }

    #[test]
    fn clear_statistics_resets_counters() {
        let mut medium = two_drone_medium(config());
        medium.send_message("controller", "broadcast", "power_on", "", false).unwrap();
        medium.advance(Instant::from_secs(1) + Duration::from_millis(1));
        assert_eq!(medium.stats().delivered, 2);

        medium.clear_statistics();
        assert_eq!(medium.stats(), MediumStats::default());
        assert!(medium.receivers().all(|endpoint| endpoint.stats().received == 0));
    }
}
