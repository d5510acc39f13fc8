//! Shared retry policy: jittered exponential backoff and auth-mode
//! fallback.
//!
//! Network failures retry the same request indefinitely with a capped,
//! jittered delay. Authorization failures do not back off — they advance
//! through the finite list of configured auth modes instead, which bounds
//! them structurally.

use crate::error::{SyncError, SyncResult};
use lagoon_types::AuthMode;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Base delay doubled per attempt.
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Ceiling on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// The delay before retry number `attempt` (zero-based), with up to 100ms
/// of jitter so synchronized clients fan out.
pub fn backoff_delay(attempt: u32) -> Duration {
    let max_ms = MAX_RETRY_DELAY.as_millis() as u64;
    let exp = attempt.min(32);
    let base = BASE_RETRY_DELAY_MS
        .saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX))
        .min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..BASE_RETRY_DELAY_MS);
    Duration::from_millis(base + jitter)
}

/// Runs `operation` until it succeeds, fails non-retryably, or the stop
/// signal fires. A stop during a backoff sleep returns promptly with
/// [`SyncError::Stopped`].
pub async fn retry_with_backoff<T, F, Fut>(
    mut operation: F,
    stop: &mut watch::Receiver<bool>,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if *stop.borrow() {
            return Err(SyncError::Stopped);
        }
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                let delay = backoff_delay(attempt);
                attempt = attempt.saturating_add(1);
                debug!(attempt, ?delay, error = %err, "retrying after backoff");
                let stopped = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    changed = stop.changed() => changed.is_err() || *stop.borrow(),
                };
                if stopped {
                    return Err(SyncError::Stopped);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Walks a model's configured auth modes in order. Advancing resets any
/// backoff state by construction: each mode starts its own retry sequence.
#[derive(Debug, Clone)]
pub struct AuthModeCursor {
    modes: Vec<AuthMode>,
    attempt: usize,
}

impl AuthModeCursor {
    /// Creates a cursor over a non-empty mode list; an empty list is padded
    /// with `fallback` so the cursor always yields a mode.
    pub fn new(modes: Vec<AuthMode>, fallback: AuthMode) -> Self {
        let modes = if modes.is_empty() {
            vec![fallback]
        } else {
            modes
        };
        Self { modes, attempt: 0 }
    }

    /// The mode for the current attempt.
    pub fn current(&self) -> AuthMode {
        self.modes[self.attempt.min(self.modes.len() - 1)]
    }

    /// Zero-based attempt index.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Moves to the next mode. Returns `false` once the list is exhausted,
    /// leaving the cursor on the last mode.
    pub fn advance(&mut self) -> bool {
        if self.attempt + 1 < self.modes.len() {
            self.attempt += 1;
            true
        } else {
            false
        }
    }

    /// Whether the current attempt is the final configured mode.
    pub fn is_last(&self) -> bool {
        self.attempt + 1 >= self.modes.len()
    }
}
