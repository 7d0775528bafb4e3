//! Junk traffic generator used to starve receivers.
//!
//! A [`FloodAttacker`] sends non-reliable `junk_data` packets through the
//! medium at a configurable rate. The packets are ordinary traffic as far as
//! the medium is concerned; the damage comes from filling receiver inboxes so
//! that reliable packets overflow and go unacknowledged.

use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::control::config::{secs_f64_to_duration, secs_to_duration};
use crate::simulation::clock::Clock;
use crate::simulation::error::MediumError;
use crate::simulation::geometry::{Position, within_range};
use crate::simulation::monitor::DEFAULT_JUNK_MESSAGE_TYPE;
use crate::simulation::network::BroadcastMedium;
use crate::simulation::types::Address;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const FIXED_PAYLOAD: &str = "JUNK";
/// Upper bound on packets emitted in a single update, in case of a very long tick.
const MAX_PACKETS_PER_UPDATE: usize = 10_000;

fn default_junk_message_type() -> String {
    DEFAULT_JUNK_MESSAGE_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Packets per second, at least 1.
    pub attack_rate: f32,
    pub randomize_rate: bool,
    /// Maximum relative deviation when randomizing (0.3 = ±30%).
    pub rate_variation: f32,
    pub attack_range: f32,
    /// Only receivers within `attack_range` are targeted.
    pub enforce_range: bool,
    /// One packet per in-range target each interval instead of one random target.
    pub attack_all_targets: bool,
    #[serde(default = "default_junk_message_type")]
    pub junk_message_type: String,
    pub random_payload: bool,
    pub payload_size: usize,
    pub burst_mode: bool,
    pub burst_duration_secs: f32,
    pub burst_pause_secs: f32,
    /// Simulation time at which the attack starts.
    pub start_secs: f32,
    pub stop_secs: Option<f32>,
    pub log_attack_packets: bool,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            attack_rate: 500.0,
            randomize_rate: false,
            rate_variation: 0.3,
            attack_range: 50.0,
            enforce_range: true,
            attack_all_targets: true,
            junk_message_type: default_junk_message_type(),
            random_payload: true,
            payload_size: 64,
            burst_mode: false,
            burst_duration_secs: 2.0,
            burst_pause_secs: 3.0,
            start_secs: 0.0,
            stop_secs: None,
            log_attack_packets: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FloodStats {
    pub total_sent: u64,
    pub current_rate: f32,
    pub targets_in_range: usize,
}

#[derive(Debug)]
pub struct FloodAttacker {
    address: Address,
    position: Position,
    config: FloodConfig,
    active: bool,
    started: bool,
    next_packet_at: Instant,
    in_burst: bool,
    phase_started: Instant,
    stats: FloodStats,
    rng: StdRng,
}

impl FloodAttacker {
    pub fn new(address: impl Into<Address>, position: Position, config: FloodConfig, seed: u64) -> Self {
        let mut config = config;
        config.attack_rate = config.attack_rate.max(1.0);
        let stats = FloodStats {
            current_rate: config.attack_rate,
            ..FloodStats::default()
        };
        Self {
            address: address.into(),
            position,
            config,
            active: false,
            started: false,
            next_packet_at: Instant::from_ticks(0),
            in_burst: true,
            phase_started: Instant::from_ticks(0),
            stats,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    pub fn stats(&self) -> FloodStats {
        self.stats
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start_attack(&mut self, now: Instant) {
        self.active = true;
        self.started = true;
        self.stats.total_sent = 0;
        self.next_packet_at = now;
        self.in_burst = true;
        self.phase_started = now;
        log::info!("[{}] Attack started", self.address);
    }

    pub fn stop_attack(&mut self) {
        self.active = false;
        log::info!("[{}] Attack stopped. Total packets sent: {}", self.address, self.stats.total_sent);
    }

    pub fn set_attack_rate(&mut self, rate: f32) {
        self.config.attack_rate = rate.max(1.0);
    }

    /// Addresses of the registered receivers this attacker can reach, never itself.
    pub fn targets_in_range<C: Clock>(&self, medium: &BroadcastMedium<C>) -> Vec<Address> {
        medium
            .receivers()
            .filter(|endpoint| endpoint.address() != &self.address)
            .filter(|endpoint| !self.config.enforce_range || within_range(&self.position, &endpoint.position, self.config.attack_range))
            .map(|endpoint| endpoint.address().clone())
            .collect()
    }

    /// Send everything that came due since the last update.
    ///
    /// # Returns
    ///
    /// Number of junk packets handed to the medium.
    pub fn update<C: Clock>(&mut self, medium: &mut BroadcastMedium<C>, now: Instant) -> Result<usize, MediumError> {
        if !self.started && now >= instant_at_secs(self.config.start_secs) {
            self.start_attack(now);
        }
        if self.active && self.config.stop_secs.is_some_and(|stop| now >= instant_at_secs(stop)) {
            self.stop_attack();
        }

        let targets = self.targets_in_range(medium);
        if targets.len() != self.stats.targets_in_range {
            log::debug!("[{}] Receivers in range changed: {} → {}", self.address, self.stats.targets_in_range, targets.len());
            self.stats.targets_in_range = targets.len();
        }

        if !self.active {
            return Ok(0);
        }
        if targets.is_empty() {
            // Nothing in range: keep the schedule anchored to the present.
            self.next_packet_at = now;
            return Ok(0);
        }

        if self.config.burst_mode && !self.update_burst(now) {
            return Ok(0);
        }

        let mut sent = 0;
        let mut emitted = 0;
        while self.next_packet_at <= now && emitted < MAX_PACKETS_PER_UPDATE {
            sent += self.send_junk(medium, &targets)?;
            emitted += 1;
            self.schedule_next_packet();
        }
        if emitted == MAX_PACKETS_PER_UPDATE {
            log::warn!("[{}] Packet budget exhausted for this update, resynchronizing", self.address);
            self.next_packet_at = now;
        }
        Ok(sent)
    }

    /// Advance the burst/pause cycle. Returns true while bursting.
    fn update_burst(&mut self, now: Instant) -> bool {
        let elapsed = now.checked_duration_since(self.phase_started).unwrap_or(Duration::from_ticks(0));
        if self.in_burst {
            if elapsed >= secs_to_duration(self.config.burst_duration_secs) {
                self.in_burst = false;
                self.phase_started = now;
                if self.config.log_attack_packets {
                    log::debug!("[{}] Burst ended. Pausing...", self.address);
                }
            }
        } else if elapsed >= secs_to_duration(self.config.burst_pause_secs) {
            self.in_burst = true;
            self.phase_started = now;
            self.next_packet_at = now;
            if self.config.log_attack_packets {
                log::debug!("[{}] Starting new burst...", self.address);
            }
        }
        self.in_burst
    }

    fn schedule_next_packet(&mut self) {
        let base = self.config.attack_rate;
        let rate = if self.config.randomize_rate && self.config.rate_variation > 0.0 {
            let variation = base * self.config.rate_variation.clamp(0.0, 1.0);
            self.rng.gen_range((base - variation).max(1.0)..=base + variation)
        } else {
            base
        };
        self.stats.current_rate = rate;
        self.next_packet_at += secs_f64_to_duration(1.0 / rate as f64);
    }

    fn send_junk<C: Clock>(&mut self, medium: &mut BroadcastMedium<C>, targets: &[Address]) -> Result<usize, MediumError> {
        let chosen: Vec<Address> = if self.config.attack_all_targets {
            targets.to_vec()
        } else {
            let index = self.rng.gen_range(0..targets.len());
            vec![targets[index].clone()]
        };

        for target in &chosen {
            let payload = self.payload();
            medium.send_message(self.address.clone(), target.clone(), self.config.junk_message_type.clone(), payload, false)?;
            self.stats.total_sent += 1;
            if self.config.log_attack_packets && self.stats.total_sent % 100 == 0 {
                log::debug!(
                    "[{}] Sent {} junk packets. Current rate: {:.1} pkt/s, Targets in range: {}",
                    self.address,
                    self.stats.total_sent,
                    self.stats.current_rate,
                    self.stats.targets_in_range
                );
            }
        }
        Ok(chosen.len())
    }

    fn payload(&mut self) -> String {
        if !self.config.random_payload {
            return FIXED_PAYLOAD.to_string();
        }
        (0..self.config.payload_size).map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())] as char).collect()
    }
}

fn instant_at_secs(secs: f32) -> Instant {
    Instant::from_ticks(0) + secs_to_duration(secs)
}
