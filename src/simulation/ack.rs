//! Acknowledgement tracking for reliable packets.
//!
//! One [`AckTracker`] exists per reliable packet still waiting for
//! confirmations. The medium owns the trackers and drives them:
//!
//! ```text
//! Pending --(last receiver confirms)--> Acknowledged
//! Pending --(deadline passed, retries left)--> Pending (retransmitted)
//! Pending --(retry_count reached max_retries)--> Expired
//! ```

use embassy_time::{Duration, Instant};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::types::{Address, Packet};
use crate::control::config::{duration_to_secs, secs_f64_to_duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acknowledged,
    Expired,
}

#[derive(Debug, Clone)]
pub struct AckTracker {
    pub packet: Arc<Packet>,
    pending_receivers: BTreeSet<Address>,
    pub sent_time: Instant,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    backoff: f32,
    pub next_retry_deadline: Instant,
    state: AckState,
}

impl AckTracker {
    pub fn new(
        packet: Arc<Packet>,
        receivers: impl IntoIterator<Item = Address>,
        now: Instant,
        timeout: Duration,
        max_retries: u32,
        backoff: f32,
    ) -> Self {
        Self {
            packet,
            pending_receivers: receivers.into_iter().collect(),
            sent_time: now,
            retry_count: 0,
            max_retries,
            timeout,
            backoff: backoff.max(1.0),
            next_retry_deadline: now + timeout,
            state: AckState::Pending,
        }
    }

    pub fn state(&self) -> AckState {
        self.state
    }

    pub fn pending_receivers(&self) -> impl Iterator<Item = &Address> {
        self.pending_receivers.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_receivers.len()
    }

    /// Remove `receiver` from the pending set.
    ///
    /// Returns true only when the receiver was still pending, so late and
    /// repeated acknowledgements are no-ops.
    pub fn confirm(&mut self, receiver: &Address) -> bool {
        let removed = self.pending_receivers.remove(receiver);
        if removed && self.pending_receivers.is_empty() {
            self.state = AckState::Acknowledged;
        }
        removed
    }

    pub fn is_acknowledged(&self) -> bool {
        self.pending_receivers.is_empty()
    }

    pub fn should_retry(&self, now: Instant) -> bool {
        self.state == AckState::Pending && now >= self.next_retry_deadline && self.retry_count < self.max_retries
    }

    /// Book a retransmission at `now` and push the deadline out, stretched by the backoff multiplier.
    pub fn record_retry(&mut self, now: Instant) {
        self.retry_count += 1;
        if self.backoff > 1.0 {
            self.timeout = secs_f64_to_duration(duration_to_secs(self.timeout) * self.backoff as f64);
        }
        self.next_retry_deadline = now + self.timeout;
    }

    pub fn has_exhausted_retries(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn expire(&mut self) {
        self.state = AckState::Expired;
    }
}
