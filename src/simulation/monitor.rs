//! Observer side of the medium.
//!
//! The medium publishes a [`MediumEvent`] for every send, delivery, drop and
//! acknowledgement change onto one bounded embassy channel per subscriber.
//! Publishing never blocks: a full channel drops the event for that subscriber
//! and the medium counts it.
//! [`PacketConsole`] turns the event stream into the scrolling packet log.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Instant;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::types::{Address, Packet, PacketId};

pub const MONITOR_CHANNEL_SIZE: usize = 256;

pub type MonitorChannel = Channel<CriticalSectionRawMutex, MediumEvent, MONITOR_CHANNEL_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Loss draw at the receiver.
    Lost,
    /// Receiver inbox full.
    Overflow,
    /// Receiver unregistered while the packet was in flight.
    Stale,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Lost => f.write_str("lost"),
            DropReason::Overflow => f.write_str("overflow"),
            DropReason::Stale => f.write_str("stale"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MediumEvent {
    Sent {
        packet: Arc<Packet>,
        recipients: usize,
        at: Instant,
    },
    Delivered {
        packet_id: PacketId,
        to: Address,
        at: Instant,
    },
    Dropped {
        packet_id: PacketId,
        to: Address,
        reason: DropReason,
        at: Instant,
    },
    AckReceived {
        packet_id: PacketId,
        from: Address,
        at: Instant,
    },
    Retransmitted {
        packet_id: PacketId,
        attempt: u32,
        pending: usize,
        at: Instant,
    },
    Acknowledged {
        packet_id: PacketId,
        at: Instant,
    },
    Expired {
        packet_id: PacketId,
        retries: u32,
        pending: Vec<Address>,
        at: Instant,
    },
}

impl MediumEvent {
    pub fn at(&self) -> Instant {
        match self {
            MediumEvent::Sent { at, .. }
            | MediumEvent::Delivered { at, .. }
            | MediumEvent::Dropped { at, .. }
            | MediumEvent::AckReceived { at, .. }
            | MediumEvent::Retransmitted { at, .. }
            | MediumEvent::Acknowledged { at, .. }
            | MediumEvent::Expired { at, .. } => *at,
        }
    }
}

/// Console row colour class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ack,
    Junk,
    Normal,
}

pub const DEFAULT_JUNK_MESSAGE_TYPE: &str = "junk_data";
const PREVIEW_LEN: usize = 20;

/// Text log of sent packets, newest last.
#[derive(Debug)]
pub struct PacketConsole {
    lines: VecDeque<String>,
    max_lines: usize,
    pub filter_junk: bool,
    junk_message_type: String,
    total_packets: u64,
    displayed_packets: u64,
    start: Instant,
}

impl PacketConsole {
    pub fn new(max_lines: usize, start: Instant) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(4),
            filter_junk: false,
            junk_message_type: DEFAULT_JUNK_MESSAGE_TYPE.to_string(),
            total_packets: 0,
            displayed_packets: 0,
            start,
        }
    }

    pub fn with_junk_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.junk_message_type = message_type.into();
        self
    }

    pub fn classify(&self, packet: &Packet) -> PacketKind {
        if packet.is_ack() || packet.message_type.to_ascii_lowercase().contains("ack") {
            PacketKind::Ack
        } else if packet.message_type == self.junk_message_type {
            PacketKind::Junk
        } else {
            PacketKind::Normal
        }
    }

    /// Feed one event; only sends produce console rows.
    pub fn observe(&mut self, event: &MediumEvent) {
        let MediumEvent::Sent { packet, at, .. } = event else {
            return;
        };
        self.total_packets += 1;
        if self.filter_junk && self.classify(packet) == PacketKind::Junk {
            return;
        }
        if self.lines.len() >= self.max_lines {
            self.lines.drain(..self.max_lines / 4);
        }
        self.displayed_packets += 1;
        let line = self.format_line(packet, *at);
        self.lines.push_back(line);
    }

    /// Drain everything currently queued on `channel`.
    pub fn drain(&mut self, channel: &MonitorChannel) -> usize {
        let mut drained = 0;
        while let Ok(event) = channel.try_receive() {
            self.observe(&event);
            drained += 1;
        }
        drained
    }

    fn format_line(&self, packet: &Packet, at: Instant) -> String {
        let elapsed = at.checked_duration_since(self.start).map_or(0.0, |d| d.as_micros() as f64 / 1_000_000.0);
        let preview = if packet.data.chars().count() > PREVIEW_LEN {
            let head: String = packet.data.chars().take(PREVIEW_LEN - 3).collect();
            format!("{head}...")
        } else {
            packet.data.clone()
        };
        format!(
            "[{:04}] {:.1}s | {:<12} → {:<12} | {:<15} | {}",
            self.displayed_packets,
            elapsed,
            packet.sender.as_str(),
            packet.recipient.as_str(),
            packet.message_type,
            preview
        )
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn displayed_packets(&self) -> u64 {
        self.displayed_packets
    }

    pub fn filtered_packets(&self) -> u64 {
        self.total_packets - self.displayed_packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(packet: Packet, at_ms: u64) -> MediumEvent {
        MediumEvent::Sent {
            packet: Arc::new(packet),
            recipients: 1,
            at: Instant::from_millis(at_ms),
        }
    }

    #[test]
    fn formats_rows_with_preview() {
        let mut console = PacketConsole::new(50, Instant::from_ticks(0));
        console.observe(&sent(Packet::new("controller", "drone1", "set_target", "10.00,20.00,30.00,40.00"), 1500));
        let line = console.lines().next().unwrap();
        assert!(line.starts_with("[0001] 1.5s | controller   → drone1       | set_target      | "));
        assert!(line.ends_with("10.00,20.00,30.00..."));
    }

    #[test]
    fn junk_filter_counts_but_hides() {
        let mut console = PacketConsole::new(50, Instant::from_ticks(0));
        console.filter_junk = true;
        console.observe(&sent(Packet::new("attacker", "drone1", "junk_data", "JUNK"), 0));
        console.observe(&sent(Packet::new("controller", "drone1", "power_on", ""), 0));
        assert_eq!(console.total_packets(), 2);
        assert_eq!(console.displayed_packets(), 1);
        assert_eq!(console.filtered_packets(), 1);
    }

    #[test]
    fn classifies_acks_and_junk() {
        let console = PacketConsole::new(50, Instant::from_ticks(0));
        let original = Packet::new("controller", "drone1", "power_on", "");
        let ack = Packet::acknowledgement(&original, &Address::from("drone1"));
        assert_eq!(console.classify(&ack), PacketKind::Ack);
        assert_eq!(console.classify(&Packet::new("a", "b", "junk_data", "")), PacketKind::Junk);
        assert_eq!(console.classify(&original), PacketKind::Normal);
    }

    #[test]
    fn old_rows_are_trimmed_in_chunks() {
        let mut console = PacketConsole::new(8, Instant::from_ticks(0));
        for i in 0..9 {
            console.observe(&sent(Packet::new("controller", "drone1", "ping", i.to_string()), 0));
        }
        // 8 rows, then 2 evicted before the 9th is appended.
        assert_eq!(console.lines().count(), 7);
        assert!(console.lines().next().unwrap().starts_with("[0003]"));
    }

    #[test]
    fn drains_channel() {
        let channel = MonitorChannel::new();
        channel.try_send(sent(Packet::new("a", "b", "ping", ""), 0)).unwrap();
        channel
            .try_send(MediumEvent::Acknowledged {
                packet_id: PacketId::new(),
                at: Instant::from_ticks(0),
            })
            .unwrap();
        let mut console = PacketConsole::new(50, Instant::from_ticks(0));
        assert_eq!(console.drain(&channel), 2);
        assert_eq!(console.total_packets(), 1);
    }
}
