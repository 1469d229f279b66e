//! Back-and-forth motion between two bounds.

use crate::error::{Error, Result};
use crate::motion::travel_time;
use crate::protocol::{BackgroundTask, Inner, KnockRod};
use crate::types::{Direction, OscillationParams};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl KnockRod {
    /// Start, retune or stop oscillating.
    ///
    /// * `speed` - fraction (0..1) of the maximum speed, 0 stops the loop
    /// * `lower`, `upper` - bounds as fractions (0..1) of the travel range
    /// * `acceleration` - 0.01 G
    ///
    /// Bounds and acceleration apply from the next stroke. Starting or
    /// changing the speed restarts the loop with a move towards whichever
    /// bound is farther from the estimated position.
    /// Must be called from within a tokio runtime.
    pub fn oscillate(&self, speed: f64, lower: f64, upper: f64, acceleration: u16) -> Result<()> {
        if !(0.0..=1.0).contains(&speed) {
            return Err(Error::InvalidArgument(format!(
                "Oscillation speed {} outside 0..1",
                speed
            )));
        }
        if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower > upper {
            return Err(Error::InvalidArgument(format!(
                "Oscillation bounds {}..{} invalid",
                lower, upper
            )));
        }

        let restart = {
            let mut params = self.inner.oscillation_params.lock();
            let restart = speed > 0.0 && (!params.active || params.speed != speed);
            let direction = params.direction;
            *params = OscillationParams {
                lower,
                upper,
                speed,
                acceleration,
                active: speed > 0.0,
                direction,
            };
            restart
        };

        if speed == 0.0 {
            self.cancel_oscillation_task();
            log::info!("Oscillation stopped");
        } else if restart {
            let session = Arc::downgrade(&self.inner);
            let mut slot = self.inner.oscillation.lock();
            let previous = slot.take();
            *slot = Some(BackgroundTask::spawn(move |cancel| async move {
                // the previous loop may still be finishing a stroke
                if let Some(previous) = previous {
                    previous.join().await;
                }
                run_oscillation(session, cancel).await
            }));
            log::info!(
                "Oscillating between {:.2} and {:.2} at {:.2} of max speed",
                lower,
                upper,
                speed
            );
        }
        Ok(())
    }

    /// Deactivate the loop and cancel its pending stroke
    pub fn stop_oscillation(&self) {
        {
            let mut params = self.inner.oscillation_params.lock();
            params.active = false;
            params.speed = 0.0;
        }
        self.cancel_oscillation_task();
    }

    pub fn oscillation_params(&self) -> OscillationParams {
        *self.inner.oscillation_params.lock()
    }

    pub fn is_oscillating(&self) -> bool {
        self.inner
            .oscillation
            .lock()
            .as_ref()
            .map_or(false, BackgroundTask::is_running)
    }

    /// The running stroke, if any, completes its exchange before the loop exits
    fn cancel_oscillation_task(&self) {
        self.inner.oscillation.lock().take();
    }
}

fn bound_position(bound: f64, range: i32) -> i32 {
    (bound * range as f64).round() as i32
}

/// Direction of the bound farther from `position`, ties go up
fn far_direction(position: i32, lower: i32, upper: i32) -> Direction {
    let position = i64::from(position);
    if (i64::from(upper) - position).abs() >= (position - i64::from(lower)).abs() {
        Direction::Up
    } else {
        Direction::Down
    }
}

/// One stroke per iteration, parameters re-read every time.
///
/// Cancellation is only observed between strokes, never during an exchange.
async fn run_oscillation(session: Weak<Inner>, cancel: CancellationToken) {
    let mut restarted = true;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let rod = match session.upgrade() {
            Some(inner) => KnockRod { inner },
            None => break,
        };
        let mut params = rod.oscillation_params();
        if !params.active {
            break;
        }

        let range = rod.travel_range();
        let lower = bound_position(params.lower, range);
        let upper = bound_position(params.upper, range);
        let estimate = rod.estimated_position();
        if restarted {
            params.direction = far_direction(estimate, lower, upper);
            rod.inner.oscillation_params.lock().direction = params.direction;
            restarted = false;
        }

        let target = match params.direction {
            Direction::Up => upper,
            Direction::Down => lower,
        };
        let max_speed = rod.config().max_speed;
        let speed = ((params.speed * max_speed as f64).round() as u32).clamp(1, max_speed);
        let distance = target.saturating_sub(estimate);
        let margin = rod.config().oscillation_margin();

        let delay = match rod.move_to(target, speed, params.acceleration).await {
            Ok(()) => {
                if !cancel.is_cancelled() {
                    rod.inner.oscillation_params.lock().direction = params.direction.flipped();
                }
                travel_time(distance, speed) + margin
            }
            Err(e) if e.is_terminal() => {
                log::error!("Oscillation stopped: {}", e);
                break;
            }
            Err(e) => {
                log::warn!("Oscillation stroke to {} failed: {}", target, e);
                margin.max(Duration::from_millis(1))
            }
        };
        drop(rod);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
