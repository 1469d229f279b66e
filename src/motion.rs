//! Position extrapolation between status polls.
//!
//! The trace is advisory. It only changes when a move is issued or homing
//! completes; the authoritative position is the one in the next status poll.

use std::time::Duration;
use tokio::time::Instant;

/// In-flight move target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    /// Target position in 0.01 mm
    pub position: i32,
    /// Estimated arrival time
    pub arrival: Instant,
}

/// Two point time/position trace of the last commanded move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionTrace {
    pub reference_time: Instant,
    /// Position in 0.01 mm at `reference_time`
    pub reference_position: i32,
    pub destination: Option<Destination>,
}

impl MotionTrace {
    /// Trace at position 0 with no move in flight
    pub fn new(now: Instant) -> Self {
        MotionTrace {
            reference_time: now,
            reference_position: 0,
            destination: None,
        }
    }

    /// Extrapolated position at `now`.
    pub fn estimate(&self, now: Instant) -> i32 {
        let destination = match self.destination {
            Some(destination) => destination,
            None => return self.reference_position,
        };
        if now >= destination.arrival {
            return destination.position;
        }
        if now <= self.reference_time {
            return self.reference_position;
        }

        let total = destination.arrival.duration_since(self.reference_time).as_secs_f64();
        let elapsed = now.duration_since(self.reference_time).as_secs_f64();
        let start = f64::from(self.reference_position);
        let delta = f64::from(destination.position) - start;
        (start + delta * elapsed / total).round() as i32
    }

    /// Record a move to `target` at `speed` (0.01 mm/s) issued at `now`.
    ///
    /// The move starts from the position estimated at `now`.
    pub fn set_destination(&mut self, now: Instant, target: i32, speed: u32) {
        let start = self.estimate(now);
        let arrival = now + travel_time(target.saturating_sub(start), speed);
        *self = MotionTrace {
            reference_time: now,
            reference_position: start,
            destination: Some(Destination {
                position: target,
                arrival,
            }),
        };
    }

    /// Forget any move in flight and restart at position 0
    pub fn reset(&mut self, now: Instant) {
        *self = MotionTrace::new(now);
    }
}

/// Time to cover `distance` (0.01 mm) at `speed` (0.01 mm/s).
pub fn travel_time(distance: i32, speed: u32) -> Duration {
    if speed == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(distance.unsigned_abs() as f64 / speed as f64)
}

/// Speed in 0.01 mm/s needed to cover `distance` (0.01 mm) in `duration`.
///
/// Durations under one millisecond are treated as one millisecond.
pub fn speed_for_duration(distance: i32, duration: Duration) -> u32 {
    let millis = duration.as_millis().max(1) as f64;
    (distance.unsigned_abs() as f64 * 1000.0 / millis).round() as u32
}
