//! Propagation delay and acknowledgement timeout calculations.
//!
//! Units:
//! - Distance: world units (meters)
//! - Time: seconds (f64) for the arithmetic, embassy `Duration` for the API
//!
//! The medium models a signal travelling at `propagation_speed` plus a fixed
//! per-hop processing delay:
//!
//! ```text
//! delay(d) = signal_delay + d / propagation_speed
//! ```
//!
//! With distance-based delay disabled every recipient gets `signal_delay`.

use embassy_time::Duration;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::control::config::{MediumConfig, secs_f64_to_duration};

/// One-way propagation delay in seconds for a given distance.
pub fn propagation_delay_secs(distance: f32, config: &MediumConfig) -> f64 {
    let signal_delay = config.signal_delay_secs as f64;
    if !config.use_distance_based_delay {
        return signal_delay;
    }
    let distance = distance.max(0.0) as f64;
    signal_delay + distance / config.propagation_speed as f64
}

/// One-way propagation delay for a given distance.
///
/// Monotonic in `distance` (constant when distance-based delay is disabled).
pub fn calculate_propagation_delay(distance: f32, config: &MediumConfig) -> Duration {
    secs_f64_to_duration(propagation_delay_secs(distance, config))
}

/// Propagation delay with optional normally distributed jitter.
///
/// The jitter term is sampled from `Normal(0, delay_jitter_secs)` and the
/// result is clamped so a delivery never lands before `signal_delay`.
pub fn calculate_jittered_delay<R: Rng + ?Sized>(distance: f32, config: &MediumConfig, rng: &mut R) -> Duration {
    let base = propagation_delay_secs(distance, config);
    if config.delay_jitter_secs <= 0.0 {
        return secs_f64_to_duration(base);
    }
    let jitter = match Normal::new(0.0_f64, config.delay_jitter_secs as f64) {
        Ok(normal) => normal.sample(rng),
        Err(err) => {
            log::warn!("Invalid jitter sigma {}: {}", config.delay_jitter_secs, err);
            0.0
        }
    };
    secs_f64_to_duration((base + jitter).max(config.signal_delay_secs as f64))
}

/// Acknowledgement timeout for a send whose farthest recipient is `max_distance` away.
///
/// Dynamic mode covers the worst-case round trip:
///
/// ```text
/// timeout = max(min_timeout, 2 * max_distance / speed + safety_margin + 2 * signal_delay)
/// ```
///
/// Otherwise the configured base timeout is used unchanged.
pub fn calculate_ack_timeout(max_distance: f32, config: &MediumConfig) -> Duration {
    if !config.dynamic_ack_timeout {
        return config.ack_timeout();
    }
    let round_trip = 2.0 * propagation_delay_secs(max_distance, config);
    let timeout = round_trip + config.ack_safety_margin_secs as f64;
    secs_f64_to_duration(timeout.max(config.min_ack_timeout_secs as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn speed_of_sound() -> MediumConfig {
        MediumConfig {
            signal_delay_secs: 0.0,
            propagation_speed: 343.0,
            ..MediumConfig::default()
        }
    }

    #[test]
    fn delay_matches_distance_over_speed() {
        let config = speed_of_sound();
        assert_eq!(calculate_propagation_delay(10.0, &config).as_micros(), 29_155);
        assert_eq!(calculate_propagation_delay(100.0, &config).as_micros(), 291_545);
        assert_eq!(calculate_propagation_delay(0.0, &config).as_micros(), 0);
    }

    #[test]
    fn delay_is_monotonic_in_distance() {
        let config = MediumConfig {
            signal_delay_secs: 0.005,
            ..speed_of_sound()
        };
        let mut previous = calculate_propagation_delay(0.0, &config);
        for step in 1..200 {
            let current = calculate_propagation_delay(step as f32 * 7.5, &config);
            assert!(current > previous, "delay must grow with distance");
            previous = current;
        }
    }

    #[test]
    fn disabled_distance_delay_is_constant() {
        let config = MediumConfig {
            signal_delay_secs: 0.02,
            use_distance_based_delay: false,
            ..speed_of_sound()
        };
        let near = calculate_propagation_delay(1.0, &config);
        let far = calculate_propagation_delay(10_000.0, &config);
        assert_eq!(near, far);
        assert_eq!(near.as_micros(), 20_000);
    }

    #[test]
    fn dynamic_timeout_covers_round_trip() {
        let config = MediumConfig {
            ack_safety_margin_secs: 0.1,
            min_ack_timeout_secs: 0.05,
            ..speed_of_sound()
        };
        let timeout = calculate_ack_timeout(100.0, &config);
        let expected = 2.0 * 100.0 / 343.0 + 0.1;
        assert!((timeout.as_micros() as f64 / 1e6 - expected).abs() < 1e-5);
    }

    #[test]
    fn dynamic_timeout_respects_floor() {
        let config = MediumConfig {
            ack_safety_margin_secs: 0.0,
            min_ack_timeout_secs: 0.25,
            ..speed_of_sound()
        };
        assert_eq!(calculate_ack_timeout(1.0, &config).as_millis(), 250);
    }

    #[test]
    fn static_timeout_ignores_distance() {
        let config = MediumConfig {
            dynamic_ack_timeout: false,
            ack_timeout_secs: 2.0,
            ..speed_of_sound()
        };
        assert_eq!(calculate_ack_timeout(5_000.0, &config).as_secs(), 2);
    }

    #[test]
    fn jitter_never_undercuts_signal_delay() {
        let config = MediumConfig {
            signal_delay_secs: 0.01,
            delay_jitter_secs: 0.5,
            ..speed_of_sound()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let delay = calculate_jittered_delay(3.0, &config, &mut rng);
            assert!(delay.as_micros() >= 10_000);
        }
    }
}
