//! Medium-wide counters.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediumStats {
    /// Packets accepted by `send`, acknowledgements included.
    pub sent: u64,
    /// Payload deliveries handed to a live endpoint.
    pub delivered: u64,
    /// Receivers confirmed through acknowledgements.
    pub acked: u64,
    /// Receivers expected to acknowledge, summed over tracked packets.
    pub tracked: u64,
    pub retransmitted: u64,
    /// Reliable packets given up after the retry cap.
    pub dropped: u64,
    pub acks_sent: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub inbox_overflows: u64,
    /// Deliveries whose target unregistered before the due time.
    pub stale_deliveries: u64,
    pub dispatched: u64,
    pub monitor_overflows: u64,
}

impl MediumStats {
    /// Share of tracked receivers that confirmed, 0 when nothing was tracked.
    pub fn ack_ratio(&self) -> f64 {
        if self.tracked == 0 {
            return 0.0;
        }
        self.acked as f64 / self.tracked as f64
    }
}
