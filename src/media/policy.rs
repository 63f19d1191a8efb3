//! Media delivery policy.

use std::time::Duration;

use crate::config::MediaConfig;
use crate::resilience::backoff::{jittered, window_for};

/// Timeouts, retry budget and watchdog settings for one media fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPolicy {
    /// Deadline for response status and headers.
    pub ttfb_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub first_body_timeout: Duration,
    pub idle_timeout: Duration,
    /// Bytes that must arrive before the idle watchdog is re-armed.
    pub progress_threshold_bytes: u64,
    /// Jitter window per retry index; the last one repeats.
    pub backoff_windows: Vec<(Duration, Duration)>,
}

impl MediaPolicy {
    /// Randomized delay before retry number `retry_index` (0-based).
    pub fn backoff_for(&self, retry_index: u32) -> Duration {
        window_for(&self.backoff_windows, retry_index)
            .map(|(min, max)| jittered(min, max))
            .unwrap_or_default()
    }
}

impl From<&MediaConfig> for MediaPolicy {
    fn from(config: &MediaConfig) -> Self {
        Self {
            ttfb_timeout: Duration::from_millis(config.ttfb_timeout_ms),
            max_retries: config.max_retries,
            first_body_timeout: Duration::from_millis(config.first_body_timeout_ms),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            progress_threshold_bytes: config.progress_threshold_bytes,
            backoff_windows: config
                .backoff_windows_ms
                .iter()
                .map(|[min, max]| (Duration::from_millis(*min), Duration::from_millis(*max)))
                .collect(),
        }
    }
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}
