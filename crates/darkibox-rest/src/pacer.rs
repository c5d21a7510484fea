//! Request pacing shared by every caller of one transport.
//!
//! Callers reserve dispatch slots under a single mutex, so concurrent tasks
//! never under-count the spacing between two requests. The spacing grows
//! when the remote signals a transient failure and decays back towards the
//! configured minimum as calls succeed.

use crate::{Error, Result};
use log::debug;
use rand::Rng;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Smallest backoff step used when the configured minimum sleep is zero.
const BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Pacing and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerConfig {
    /// Minimum spacing between two dispatched requests.
    pub min_sleep: Duration,
    /// Upper bound for the spacing after repeated transient failures.
    pub max_sleep: Duration,
    /// Each success shrinks the spacing by `sleep / 2^decay_constant`.
    pub decay_constant: u32,
    /// Total attempts for a replayable request, including the first one.
    pub retries: u32,
    /// Random extra delay added before a retry.
    pub jitter: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_millis(10),
            max_sleep: Duration::from_secs(2),
            decay_constant: 2,
            retries: 10,
            jitter: Duration::from_millis(20),
        }
    }
}

#[derive(Debug)]
struct PacerState {
    next_slot: Instant,
    sleep: Duration,
}

/// A reserved dispatch slot.
#[derive(Debug, Clone, Copy)]
struct Slot {
    at: Instant,
    end: Instant,
}

/// Global request pacer.
#[derive(Debug)]
pub struct Pacer {
    config: PacerConfig,
    state: Mutex<PacerState>,
}

impl Pacer {
    /// Create a pacer with the given policy.
    pub fn new(config: PacerConfig) -> Self {
        let sleep = config.min_sleep;
        Self {
            config,
            state: Mutex::new(PacerState {
                next_slot: Instant::now(),
                sleep,
            }),
        }
    }

    /// The policy this pacer enforces.
    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    /// Current spacing between dispatches.
    pub fn current_sleep(&self) -> Duration {
        self.lock().sleep
    }

    /// Wait for the next dispatch slot.
    ///
    /// If `cancel` fires first the slot is handed back, provided nobody
    /// reserved a later one in the meantime.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let slot = self.reserve();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.release(slot);
                Err(Error::Cancelled)
            }
            _ = sleep_until(slot.at) => Ok(()),
        }
    }

    /// Record a successful call and let the spacing decay.
    pub fn on_success(&self) {
        let mut state = self.lock();
        let shift = self.config.decay_constant.min(31);
        let decayed = state.sleep.saturating_sub(state.sleep / (1u32 << shift));
        state.sleep = decayed.max(self.config.min_sleep);
    }

    /// Record a transient failure: double the spacing and push the next
    /// slot out by the jitter or the server's `Retry-After`, whichever is
    /// later.
    pub fn on_retry(&self, retry_after: Option<Duration>) {
        let jitter = self.jitter();
        let mut state = self.lock();
        state.sleep = (state.sleep * 2)
            .max(BASE_BACKOFF)
            .min(self.config.max_sleep)
            .max(self.config.min_sleep);

        let now = Instant::now();
        let mut earliest = now + jitter;
        if let Some(after) = retry_after {
            earliest = earliest.max(now + after.min(self.config.max_sleep));
        }
        state.next_slot = state.next_slot.max(earliest);
        debug!(
            "pacer backing off: sleep {:?}, retry_after {:?}",
            state.sleep, retry_after
        );
    }

    fn reserve(&self) -> Slot {
        let mut state = self.lock();
        let at = state.next_slot.max(Instant::now());
        state.next_slot = at + state.sleep;
        Slot {
            at,
            end: state.next_slot,
        }
    }

    fn release(&self, slot: Slot) {
        let mut state = self.lock();
        if state.next_slot == slot.end {
            state.next_slot = slot.at;
        }
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.config.jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    fn lock(&self) -> MutexGuard<'_, PacerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn next_slot(&self) -> Instant {
        self.lock().next_slot
    }
}
