pub mod common;
pub mod control;
pub mod scenario;
pub mod simulation;
