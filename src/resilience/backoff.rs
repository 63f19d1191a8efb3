//! Backoff delays: linear steps for store reads, jittered windows for media retries.

use rand::Rng;
use std::time::Duration;

/// Linear backoff after the `attempt`-th failure (0-based): `step * (attempt + 1)`.
pub fn linear_backoff(attempt: u32, step: Duration) -> Duration {
    step.saturating_mul(attempt.saturating_add(1))
}

/// Uniformly random delay in `[min, max]`.
pub fn jittered(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Pick the jitter window for a retry index; the last window repeats.
pub fn window_for(windows: &[(Duration, Duration)], retry_index: u32) -> Option<(Duration, Duration)> {
    let last = windows.len().checked_sub(1)?;
    let idx = (retry_index as usize).min(last);
    windows.get(idx).copied()
}
