use std::time::{Duration, Instant};

use crate::shading::TIME_WRAP_SECONDS;

/// Monotonic clock behind the `u_time` uniform.
#[derive(Clone, Copy, Debug)]
pub struct EffectClock {
    start: Instant,
}

impl EffectClock {
    pub fn new(now: Instant) -> Self {
        Self { start: now }
    }

    /// Seconds since the clock started, wrapped to keep shader precision.
    pub fn seconds(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.start);
        wrap_seconds(elapsed)
    }
}

fn wrap_seconds(elapsed: Duration) -> f32 {
    (elapsed.as_secs_f64() % TIME_WRAP_SECONDS as f64) as f32
}
