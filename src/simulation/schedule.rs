//! Pending deliveries ordered by due time.
//!
//! `BinaryHeap` is a max-heap, so the ordering of [`ScheduledDelivery`] is
//! reversed: the earliest due time pops first, and among equal due times the
//! entry scheduled first wins.

use embassy_time::Instant;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::types::{Address, Packet};

/// One packet in flight towards one receiver.
#[derive(Debug, Clone)]
pub struct ScheduledDelivery {
    pub due: Instant,
    /// Insertion counter, breaks ties between equal due times.
    pub order: u64,
    pub packet: Arc<Packet>,
    /// `None` for acknowledgements, which are routed to the ack tracker.
    pub target: Option<Address>,
    pub distance: f32,
}

impl PartialEq for ScheduledDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.order == other.order
    }
}

impl Eq for ScheduledDelivery {}

impl PartialOrd for ScheduledDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledDelivery {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.due.cmp(&self.due) {
            Ordering::Equal => other.order.cmp(&self.order),
            ord => ord,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeliverySchedule {
    heap: BinaryHeap<ScheduledDelivery>,
    next_order: u64,
}

impl DeliverySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, due: Instant, packet: Arc<Packet>, target: Option<Address>, distance: f32) {
        let order = self.next_order;
        self.next_order += 1;
        self.heap.push(ScheduledDelivery {
            due,
            order,
            packet,
            target,
            distance,
        });
    }

    /// Remove and return the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<ScheduledDelivery> {
        if self.heap.peek().is_some_and(|next| next.due <= now) {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|next| next.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(tag: &str) -> Arc<Packet> {
        Arc::new(Packet::new("controller", "drone1", tag, ""))
    }

    #[test]
    fn earliest_due_pops_first() {
        let mut schedule = DeliverySchedule::new();
        schedule.push(Instant::from_millis(300), packet("late"), None, 0.0);
        schedule.push(Instant::from_millis(100), packet("early"), None, 0.0);

        assert!(schedule.pop_due(Instant::from_millis(50)).is_none());
        let first = schedule.pop_due(Instant::from_millis(400)).unwrap();
        assert_eq!(first.packet.message_type, "early");
        let second = schedule.pop_due(Instant::from_millis(400)).unwrap();
        assert_eq!(second.packet.message_type, "late");
        assert!(schedule.is_empty());
    }

    #[test]
    fn equal_due_times_keep_insertion_order() {
        let mut schedule = DeliverySchedule::new();
        let due = Instant::from_millis(10);
        for tag in ["a", "b", "c"] {
            schedule.push(due, packet(tag), None, 0.0);
        }
        let order: Vec<String> = std::iter::from_fn(|| schedule.pop_due(due)).map(|d| d.packet.message_type.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
