//! Scene loading, parsing, and validation logic.
//!
//! A scene describes everything the headless runner needs: the vehicles that
//! own receiver endpoints, send-only controllers, flood attackers and the
//! scripted traffic to inject.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::scenario::flood::FloodConfig;
use crate::simulation::geometry::Position;
use crate::simulation::processor::{ProcessingMethod, ProcessingRates};
use crate::simulation::types::BROADCAST_ADDRESSES;

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_duration_secs() -> f32 {
    10.0
}

/// A vehicle owning a receiver endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct VehicleSpec {
    pub address: String,
    pub position: Position,
    /// World units per second, applied every tick.
    #[serde(default)]
    pub velocity: Position,
    #[serde(default)]
    pub drop_probability: f32,
    /// Receive-side processing model; unlimited when absent.
    #[serde(default)]
    pub processing_method: Option<ProcessingMethod>,
    /// Overrides the medium's default inbox size.
    #[serde(default)]
    pub inbox_capacity: Option<usize>,
}

/// A send-only participant such as a ground controller.
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerSpec {
    pub address: String,
    pub position: Position,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttackerSpec {
    pub address: String,
    pub position: Position,
    #[serde(flatten)]
    pub flood: FloodConfig,
}

/// One scripted send, optionally repeated.
#[derive(Debug, Deserialize, Clone)]
pub struct TrafficSpec {
    pub at_secs: f32,
    pub sender: String,
    pub recipient: String,
    pub message_type: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub reliable: bool,
    #[serde(default)]
    pub repeat_every_secs: Option<f32>,
    /// Last repetition time; the scene end when absent.
    #[serde(default)]
    pub until_secs: Option<f32>,
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize, Clone)]
pub struct Scene {
    /// Overrides the medium seed from config.toml.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f32,
    /// Stand-in position for senders the medium does not know.
    #[serde(default)]
    pub reference_position: Position,
    #[serde(default)]
    pub processing_rates: ProcessingRates,
    pub vehicles: Vec<VehicleSpec>,
    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,
    #[serde(default)]
    pub attackers: Vec<AttackerSpec>,
    #[serde(default)]
    pub traffic: Vec<TrafficSpec>,
}

impl Scene {
    fn addresses(&self) -> impl Iterator<Item = &str> {
        self.vehicles
            .iter()
            .map(|v| v.address.as_str())
            .chain(self.controllers.iter().map(|c| c.address.as_str()))
            .chain(self.attackers.iter().map(|a| a.address.as_str()))
    }
}

/// Load and parse a scene from a file.
///
/// # Parameters
///
/// * `path` - Path to the scene JSON file
///
/// # Returns
///
/// Parsed and validated Scene or an error.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;

    parse_scene(&data)
}

/// Parse and validate scene JSON.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Validate scene configuration.
///
/// Checks for issues that would cause runtime problems:
/// - Empty or oversized vehicle list
/// - Duplicate, empty or reserved addresses
/// - Non-finite positions and out-of-range drop probabilities
/// - Nonsensical timing, attacker and traffic parameters
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_NODES: usize = 10000;
    const MAX_PAYLOAD_SIZE: usize = 65536;

    if scene.vehicles.is_empty() {
        return Err("Scene must contain at least one vehicle".to_string());
    }
    if scene.vehicles.len() > MAX_NODES {
        return Err(format!("Vehicle count {} exceeds maximum of {}", scene.vehicles.len(), MAX_NODES));
    }
    if scene.tick_interval_ms == 0 {
        return Err("tick_interval_ms must be positive".to_string());
    }
    if !(scene.duration_secs.is_finite() && scene.duration_secs > 0.0) {
        return Err(format!("Invalid duration_secs {}, must be positive", scene.duration_secs));
    }

    // Addresses are shared by vehicles, controllers and attackers
    let mut addresses = HashSet::new();
    for address in scene.addresses() {
        if address.trim().is_empty() {
            return Err("Empty address found".to_string());
        }
        if BROADCAST_ADDRESSES.contains(&address) {
            return Err(format!("Address '{}' is reserved for broadcast", address));
        }
        if !addresses.insert(address) {
            return Err(format!("Duplicate address found: {}", address));
        }
    }

    for vehicle in &scene.vehicles {
        if !vehicle.position.is_finite() || !vehicle.velocity.is_finite() {
            return Err(format!("Vehicle {} has a non-finite position or velocity", vehicle.address));
        }
        if !(0.0..=1.0).contains(&vehicle.drop_probability) {
            return Err(format!(
                "Vehicle {} drop_probability {} outside 0-1",
                vehicle.address, vehicle.drop_probability
            ));
        }
        if vehicle.inbox_capacity == Some(0) {
            return Err(format!("Vehicle {} inbox_capacity must be at least 1", vehicle.address));
        }
    }

    for controller in &scene.controllers {
        if !controller.position.is_finite() {
            return Err(format!("Controller {} has a non-finite position", controller.address));
        }
    }

    for attacker in &scene.attackers {
        let flood = &attacker.flood;
        if !attacker.position.is_finite() {
            return Err(format!("Attacker {} has a non-finite position", attacker.address));
        }
        if !(flood.attack_rate.is_finite() && flood.attack_rate >= 1.0) {
            return Err(format!("Attacker {} attack_rate {} must be at least 1", attacker.address, flood.attack_rate));
        }
        if !(0.0..=1.0).contains(&flood.rate_variation) {
            return Err(format!("Attacker {} rate_variation {} outside 0-1", attacker.address, flood.rate_variation));
        }
        if flood.enforce_range && !(flood.attack_range.is_finite() && flood.attack_range > 0.0) {
            return Err(format!("Attacker {} attack_range must be positive", attacker.address));
        }
        if flood.payload_size > MAX_PAYLOAD_SIZE {
            return Err(format!("Attacker {} payload_size {} exceeds {}", attacker.address, flood.payload_size, MAX_PAYLOAD_SIZE));
        }
        if flood.junk_message_type.trim().is_empty() {
            return Err(format!("Attacker {} junk_message_type must not be empty", attacker.address));
        }
        if flood.burst_mode && !(flood.burst_duration_secs > 0.0 && flood.burst_pause_secs >= 0.0) {
            return Err(format!("Attacker {} burst durations must be positive", attacker.address));
        }
        if let Some(stop) = flood.stop_secs {
            if stop < flood.start_secs {
                return Err(format!("Attacker {} stops at {}s before starting at {}s", attacker.address, stop, flood.start_secs));
            }
        }
    }

    for (idx, traffic) in scene.traffic.iter().enumerate() {
        if !(traffic.at_secs.is_finite() && traffic.at_secs >= 0.0) {
            return Err(format!("Traffic {} has invalid at_secs {}", idx, traffic.at_secs));
        }
        if !addresses.contains(traffic.sender.as_str()) {
            return Err(format!("Traffic {} sender '{}' is not part of the scene", idx, traffic.sender));
        }
        if traffic.recipient.trim().is_empty() || traffic.message_type.trim().is_empty() {
            return Err(format!("Traffic {} needs a recipient and a message_type", idx));
        }
        if let Some(repeat) = traffic.repeat_every_secs {
            if !(repeat.is_finite() && repeat > 0.0) {
                return Err(format!("Traffic {} repeat_every_secs must be positive", idx));
            }
        }
    }

    Ok(())
}
