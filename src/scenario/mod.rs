//! Actors driven on top of the medium: the vehicle fleet runner and the flood attacker.

pub mod fleet;
pub mod flood;

pub use fleet::{Simulation, SimulationReport};
pub use flood::{FloodAttacker, FloodConfig};
