//! Geometry helpers for distance-based propagation.
//!
//! Positions are owned by the vehicles; the transport only reads them to turn
//! sender/receiver separation into a propagation delay.

use serde::{Deserialize, Serialize};

/// 3D point in world units (meters).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Move by `velocity * dt_secs`.
    pub fn advanced_by(&self, velocity: &Position, dt_secs: f32) -> Position {
        Position {
            x: self.x + velocity.x * dt_secs,
            y: self.y + velocity.y * dt_secs,
            z: self.z + velocity.z * dt_secs,
        }
    }

    /// Vector length, used for speed reports.
    pub fn magnitude(&self) -> f32 {
        distance_from_d2(distance2(&Position::ORIGIN, self))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Squared Euclidean distance (avoids a sqrt for range comparisons).
pub fn distance2(a: &Position, b: &Position) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// Convert squared distance back to distance.
pub fn distance_from_d2(d2: f32) -> f32 {
    d2.sqrt()
}

/// Euclidean distance between two positions.
pub fn distance(a: &Position, b: &Position) -> f32 {
    distance_from_d2(distance2(a, b))
}

/// Inclusive range check without a sqrt.
pub fn within_range(a: &Position, b: &Position, range: f32) -> bool {
    distance2(a, b) <= range * range
}
