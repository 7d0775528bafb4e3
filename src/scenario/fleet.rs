//! Headless scenario runner.
//!
//! Builds a [`BroadcastMedium`] from a [`Scene`] and steps it at a fixed tick:
//! 1) advance the clock and move the vehicles
//! 2) inject scripted traffic that came due
//! 3) let the flood attackers send
//! 4) advance the medium
//! 5) drain the monitor into the packet console

use embassy_time::{Duration, Instant};
use serde::Serialize;
use std::sync::Arc;

use crate::common::scene::{Scene, TrafficSpec};
use crate::control::config::{MediumConfig, duration_to_secs, secs_to_duration};
use crate::scenario::flood::{FloodAttacker, FloodStats};
use crate::simulation::clock::{Clock, SimClock};
use crate::simulation::geometry::Position;
use crate::simulation::monitor::{DEFAULT_JUNK_MESSAGE_TYPE, MonitorChannel, PacketConsole};
use crate::simulation::network::BroadcastMedium;
use crate::simulation::processor::{PacketProcessor, ProcessingMethod};
use crate::simulation::receiver::{EndpointStats, ReceiverEndpoint};
use crate::simulation::router::{MessageRouter, OutgoingMessage};
use crate::simulation::stats::MediumStats;
use crate::simulation::types::Address;

const CONSOLE_LINES: usize = 50;

/// Message types vehicles understand without replying.
const VEHICLE_COMMANDS: [&str; 7] = [
    "set_target",
    "formation_offset",
    "formation_active",
    "power_on",
    "power_off",
    "position_report",
    "checkpoint_reached",
];

#[derive(Debug, Clone)]
struct Vehicle {
    address: Address,
    position: Position,
    velocity: Position,
}

#[derive(Debug, Clone)]
struct ScriptedTraffic {
    spec: TrafficSpec,
    next_at: Instant,
    until: Option<Instant>,
}

/// Router every vehicle gets: answers status requests, logs commands, drops junk.
pub fn vehicle_router(velocity: Position, junk_message_type: &str) -> MessageRouter {
    let mut router = MessageRouter::new();
    let speed = velocity.magnitude();
    router.on("status_request", move |packet, ctx| {
        let status = format!("{:.2},{:.2},{:.2}|{:.2}", ctx.position.x, ctx.position.y, ctx.position.z, speed);
        Some(OutgoingMessage::new(packet.sender.clone(), "status_response", status))
    });
    router.on("status_response", |packet, ctx| {
        log::info!("[{}] Status from {}: {}", ctx.address, packet.sender, packet.data);
        None
    });
    for command in VEHICLE_COMMANDS {
        router.on(command, move |packet, ctx| {
            log::debug!("[{}] {} from {}: {}", ctx.address, command, packet.sender, packet.data);
            None
        });
    }
    router.on(junk_message_type, |_, _| None);
    router
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub address: String,
    pub position: Position,
    pub drop_probability: f32,
    pub processing_method: Option<ProcessingMethod>,
    pub inbox_len: usize,
    pub stats: EndpointStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttackerReport {
    pub address: String,
    #[serde(flatten)]
    pub stats: FloodStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub simulated_secs: f64,
    pub medium: MediumStats,
    pub ack_ratio: f64,
    pub pending_acks: usize,
    pub scheduled_deliveries: usize,
    pub send_errors: u64,
    pub endpoints: Vec<EndpointReport>,
    pub attackers: Vec<AttackerReport>,
}

pub struct Simulation {
    medium: BroadcastMedium<SimClock>,
    monitor: Arc<MonitorChannel>,
    console: PacketConsole,
    vehicles: Vec<Vehicle>,
    attackers: Vec<FloodAttacker>,
    traffic: Vec<ScriptedTraffic>,
    tick: Duration,
    end: Instant,
    send_errors: u64,
}

impl Simulation {
    pub fn from_scene(scene: &Scene, config: MediumConfig) -> Self {
        let mut config = config;
        if let Some(seed) = scene.seed {
            config.seed = seed;
        }
        let seed = config.seed;
        let start = Instant::from_ticks(0);

        let mut medium = BroadcastMedium::new(config.clone(), SimClock::starting_at(start)).with_reference_position(scene.reference_position);
        let monitor = medium.subscribe();
        let junk_type = scene.attackers.first().map_or(DEFAULT_JUNK_MESSAGE_TYPE, |a| a.flood.junk_message_type.as_str());

        let mut vehicles = Vec::with_capacity(scene.vehicles.len());
        for spec in &scene.vehicles {
            let mut endpoint = ReceiverEndpoint::from_config(spec.address.as_str(), spec.position, &config)
                .with_drop_probability(spec.drop_probability)
                .with_router(vehicle_router(spec.velocity, junk_type));
            if let Some(capacity) = spec.inbox_capacity {
                endpoint = endpoint.with_inbox_capacity(capacity);
            }
            if let Some(method) = spec.processing_method {
                endpoint = endpoint.with_processor(PacketProcessor::new(method, scene.processing_rates));
            }
            medium.register_receiver(endpoint);
            vehicles.push(Vehicle {
                address: Address::from(spec.address.as_str()),
                position: spec.position,
                velocity: spec.velocity,
            });
        }

        for controller in &scene.controllers {
            medium.register_sender(controller.address.as_str(), controller.position);
        }

        let attackers = scene
            .attackers
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                medium.register_sender(spec.address.as_str(), spec.position);
                FloodAttacker::new(spec.address.as_str(), spec.position, spec.flood.clone(), seed.wrapping_add(idx as u64 + 1))
            })
            .collect();

        let traffic = scene
            .traffic
            .iter()
            .map(|spec| ScriptedTraffic {
                spec: spec.clone(),
                next_at: start + secs_to_duration(spec.at_secs),
                until: spec.until_secs.map(|until| start + secs_to_duration(until)),
            })
            .collect();

        let mut console = PacketConsole::new(CONSOLE_LINES, start);
        console.filter_junk = !scene.attackers.is_empty();

        log::info!(
            "Scene loaded: {} vehicles, {} controllers, {} attackers, {} scripted messages",
            scene.vehicles.len(),
            scene.controllers.len(),
            scene.attackers.len(),
            scene.traffic.len()
        );

        Self {
            medium,
            monitor,
            console,
            vehicles,
            attackers,
            traffic,
            tick: Duration::from_millis(scene.tick_interval_ms),
            end: start + secs_to_duration(scene.duration_secs),
            send_errors: 0,
        }
    }

    pub fn medium(&self) -> &BroadcastMedium<SimClock> {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut BroadcastMedium<SimClock> {
        &mut self.medium
    }

    pub fn console(&self) -> &PacketConsole {
        &self.console
    }

    pub fn now(&self) -> Instant {
        self.medium.clock().now()
    }

    pub fn is_finished(&self) -> bool {
        self.now() >= self.end
    }

    /// Run one tick.
    pub fn step(&mut self) {
        let now = self.medium.clock().advance(self.tick);
        let dt = duration_to_secs(self.tick) as f32;

        for vehicle in &mut self.vehicles {
            if vehicle.velocity != Position::ORIGIN {
                vehicle.position = vehicle.position.advanced_by(&vehicle.velocity, dt);
                self.medium.update_position(&vehicle.address, vehicle.position);
            }
        }

        self.send_due_traffic(now);

        for attacker in &mut self.attackers {
            if let Err(err) = attacker.update(&mut self.medium, now) {
                self.send_errors += 1;
                log::warn!("[{}] Attack packet rejected: {}", attacker.address(), err);
            }
        }

        self.medium.tick();
        self.console.drain(&self.monitor);
    }

    fn send_due_traffic(&mut self, now: Instant) {
        for scripted in &mut self.traffic {
            while scripted.next_at <= now {
                let spec = &scripted.spec;
                match self.medium.send_message(spec.sender.as_str(), spec.recipient.as_str(), spec.message_type.as_str(), spec.data.as_str(), spec.reliable) {
                    Ok(packet_id) => log::debug!("Scripted {} from {} to {}: {}", spec.message_type, spec.sender, spec.recipient, packet_id),
                    Err(err) => {
                        self.send_errors += 1;
                        log::warn!("Scripted {} from {} rejected: {}", spec.message_type, spec.sender, err);
                    }
                }
                let Some(repeat) = spec.repeat_every_secs else {
                    scripted.next_at = Instant::MAX;
                    break;
                };
                scripted.next_at += secs_to_duration(repeat);
                if scripted.until.is_some_and(|until| scripted.next_at > until) {
                    scripted.next_at = Instant::MAX;
                }
            }
        }
    }

    /// Step until the scene duration has elapsed and report.
    pub fn run(&mut self) -> SimulationReport {
        while !self.is_finished() {
            self.step();
        }
        log::info!("Simulation finished at {:.3}s", duration_to_secs(self.now().duration_since(Instant::from_ticks(0))));
        self.report()
    }

    pub fn report(&self) -> SimulationReport {
        let stats = self.medium.stats();
        SimulationReport {
            simulated_secs: duration_to_secs(self.now().duration_since(Instant::from_ticks(0))),
            medium: stats,
            ack_ratio: stats.ack_ratio(),
            pending_acks: self.medium.pending_ack_count(),
            scheduled_deliveries: self.medium.scheduled_count(),
            send_errors: self.send_errors,
            endpoints: self
                .medium
                .receivers()
                .map(|endpoint| EndpointReport {
                    address: endpoint.address().to_string(),
                    position: endpoint.position,
                    drop_probability: endpoint.drop_probability(),
                    processing_method: endpoint.processor().map(PacketProcessor::method),
                    inbox_len: endpoint.inbox_len(),
                    stats: endpoint.stats().clone(),
                })
                .collect(),
            attackers: self
                .attackers
                .iter()
                .map(|attacker| AttackerReport {
                    address: attacker.address().to_string(),
                    stats: attacker.stats(),
                })
                .collect(),
        }
    }
}
