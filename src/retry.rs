//! Backoff policy and pool-wide throttle.
//!
//! [`BackoffPolicy`] is the single retry schedule used by every outbound
//! request. [`Throttle`] is shared by all workers: an HTTP 429, or a run of
//! consecutive transient failures, pauses the whole pool for a fixed delay.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::config::ResolverConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; later retries wait a multiple of it.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.backoff_base(),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): `base * retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(retry.max(1))
            .min(self.max_delay)
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Process-wide pause shared by every worker.
#[derive(Debug)]
pub struct Throttle {
    paused_until: Mutex<Option<Instant>>,
    consecutive_transient: AtomicU32,
    trip_after: u32,
    pause: Duration,
}

impl Throttle {
    pub fn new(pause: Duration, trip_after: u32) -> Self {
        Self {
            paused_until: Mutex::new(None),
            consecutive_transient: AtomicU32::new(0),
            trip_after,
            pause,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(config.rate_limit_delay(), config.throttle_after)
    }

    /// The fixed pool-wide delay applied on a trip.
    pub fn pause(&self) -> Duration {
        self.pause
    }

    /// Pause the whole pool for the configured delay.
    pub fn trip(&self) {
        let until = Instant::now() + self.pause;
        let mut guard = self
            .paused_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.map_or(true, |current| current < until) {
            *guard = Some(until);
        }
    }

    pub fn paused_until(&self) -> Option<Instant> {
        let guard = self
            .paused_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.filter(|until| *until > Instant::now())
    }

    /// Wait out any active pause.
    pub async fn wait(&self) {
        if let Some(until) = self.paused_until() {
            tokio::time::sleep_until(until).await;
        }
    }

    /// Record a transient failure; trips the pool once the run reaches the threshold.
    pub fn note_transient(&self) {
        let run = self.consecutive_transient.fetch_add(1, Ordering::SeqCst) + 1;
        if self.trip_after > 0 && run >= self.trip_after {
            warn!(run, pause = ?self.pause, "Upstream unstable, pausing worker pool");
            self.consecutive_transient.store(0, Ordering::SeqCst);
            self.trip();
        }
    }

    pub fn note_success(&self) {
        self.consecutive_transient.store(0, Ordering::SeqCst);
    }
}
