//! Receive-side processing cost.
//!
//! An endpoint with a [`PacketProcessor`] behaves as a single server: every
//! accepted packet occupies it for `1 / packets_per_second` of the configured
//! method, in inbox order. Packets whose service has not finished by the
//! current tick stay queued, which is what lets a flood fill the inbox.

use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::control::config::secs_f64_to_duration;

/// Receive-side service model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    /// Plain forwarding without inspection.
    #[default]
    Normal,
    /// Connection tracking and stateful inspection.
    StandardDdos,
    NovelDdos,
}

impl fmt::Display for ProcessingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingMethod::Normal => "Normal",
            ProcessingMethod::StandardDdos => "StandardDDoS",
            ProcessingMethod::NovelDdos => "NovelDDoS",
        };
        f.write_str(name)
    }
}

/// Packets per second each method can process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingRates {
    pub normal: f32,
    pub standard_ddos: f32,
    pub novel_ddos: f32,
}

impl Default for ProcessingRates {
    fn default() -> Self {
        Self {
            normal: 200.0,
            standard_ddos: 50.0,
            novel_ddos: 150.0,
        }
    }
}

impl ProcessingRates {
    pub fn packets_per_second(&self, method: ProcessingMethod) -> f32 {
        match method {
            ProcessingMethod::Normal => self.normal,
            ProcessingMethod::StandardDdos => self.standard_ddos,
            ProcessingMethod::NovelDdos => self.novel_ddos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PacketProcessor {
    method: ProcessingMethod,
    rates: ProcessingRates,
    busy_until: Option<Instant>,
    processed: u64,
    pub log_processing_times: bool,
}

impl PacketProcessor {
    pub fn new(method: ProcessingMethod, rates: ProcessingRates) -> Self {
        Self {
            method,
            rates,
            busy_until: None,
            processed: 0,
            log_processing_times: false,
        }
    }

    pub fn method(&self) -> ProcessingMethod {
        self.method
    }

    pub fn set_method(&mut self, method: ProcessingMethod) {
        self.method = method;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Time needed to process one packet. A non-positive rate means no cost.
    pub fn service_time(&self) -> Duration {
        let rate = self.rates.packets_per_second(self.method);
        if !(rate.is_finite() && rate > 0.0) {
            return Duration::from_ticks(0);
        }
        secs_f64_to_duration(1.0 / rate as f64)
    }

    /// Try to finish the packet at the head of the inbox.
    ///
    /// Service starts when both the packet has arrived and the previous one
    /// is done. Returns true and books the server when processing completes
    /// no later than `now`.
    pub fn complete(&mut self, enqueued_at: Instant, now: Instant) -> bool {
        let start = match self.busy_until {
            Some(busy_until) if busy_until > enqueued_at => busy_until,
            _ => enqueued_at,
        };
        let service = self.service_time();
        let finish = start + service;
        if finish > now {
            return false;
        }
        if self.log_processing_times {
            log::debug!(
                "Processed packet using {} method (time: {:.4}s, rate: {:.1} pkt/s)",
                self.method,
                service.as_micros() as f64 / 1_000_000.0,
                self.rates.packets_per_second(self.method)
            );
        }
        self.busy_until = Some(finish);
        self.processed += 1;
        true
    }
}
