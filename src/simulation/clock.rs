//! Simulation time source.
//!
//! The medium never reads wall-clock time. Hosts inject a [`Clock`]; the
//! headless runner and the tests drive a [`SimClock`] by hand.

use embassy_time::{Duration, Instant};
use std::cell::Cell;

/// Source of the current simulation time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Manually stepped clock starting at tick zero.
#[derive(Debug)]
pub struct SimClock {
    current: Cell<Instant>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::from_ticks(0))
    }

    pub fn starting_at(start: Instant) -> Self {
        Self { current: Cell::new(start) }
    }

    /// Jump to `time`. Moving backwards is ignored.
    pub fn set(&self, time: Instant) {
        if time >= self.current.get() {
            self.current.set(time);
        } else {
            log::warn!("SimClock: refusing to move back from {} to {} us", self.current.get().as_micros(), time.as_micros());
        }
    }

    pub fn advance(&self, by: Duration) -> Instant {
        let next = self.current.get() + by;
        self.current.set(next);
        next
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        self.current.get()
    }
}
