//! Bandwidth throttling for streamed transfers.
//!
//! This is a feedback controller evaluated once per chunk, not a leaky
//! bucket: it compares the average rate since the transfer started with
//! the ceiling and sleeps just long enough to bring the average back
//! down. Elapsed time is floored at one second, so bursts during the
//! first second are only corrected once they exceed a full second's
//! allowance, and earlier bursts are never penalised retroactively.

use std::time::Duration;
use tokio::time::Instant;

/// Longest single pause (`i32::MAX` milliseconds).
pub const MAX_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

/// How long to pause after `bytes` were moved in `elapsed`.
///
/// `limit_kbps <= 0` means unlimited and always yields `None`.
pub fn throttle_delay(limit_kbps: i64, bytes: u64, elapsed: Duration) -> Option<Duration> {
    if limit_kbps <= 0 {
        return None;
    }
    let secs = elapsed.as_secs_f64().max(1.0);
    let rate = bytes as f64 / secs;
    if rate <= limit_kbps as f64 * 1000.0 {
        return None;
    }

    // Time the transfer should have taken at exactly the limit.
    let target_ms = bytes as f64 / limit_kbps as f64;
    let delay_ms = target_ms - elapsed.as_millis() as f64;
    if delay_ms <= 0.0 {
        return None;
    }
    Some(Duration::from_millis(delay_ms.min(MAX_DELAY.as_millis() as f64) as u64))
}

/// Whether a pause blocks the thread or suspends the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// `tokio::time::sleep`.
    Cooperative,
    /// `std::thread::sleep`, for callers that own their thread.
    Blocking,
}

impl Pacing {
    pub async fn pause(self, delay: Duration) {
        match self {
            Pacing::Cooperative => tokio::time::sleep(delay).await,
            Pacing::Blocking => std::thread::sleep(delay),
        }
    }
}

/// Per-transfer limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit_kbps: i64,
    started: Instant,
    pacing: Pacing,
}

impl RateLimiter {
    pub fn new(limit_kbps: i64, pacing: Pacing) -> Self {
        Self {
            limit_kbps,
            started: Instant::now(),
            pacing,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit_kbps <= 0
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Pause if `transferred` bytes so far exceed the ceiling.
    /// Returns the pause taken.
    pub async fn throttle(&self, transferred: u64) -> Option<Duration> {
        let delay = throttle_delay(self.limit_kbps, transferred, self.started.elapsed())?;
        log::trace!(
            "Throttling for {} ms ({} bytes, limit {} KB/s)",
            delay.as_millis(),
            transferred,
            self.limit_kbps
        );
        self.pacing.pause(delay).await;
        Some(delay)
    }
}
