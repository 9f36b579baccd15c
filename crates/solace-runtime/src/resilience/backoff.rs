//! Lock-free "skip the primary until" hint.
//!
//! Set when the primary reports resource exhaustion while a secondary is
//! available, cleared by the next primary success. Reads and writes are
//! single atomic operations, so the hint may be briefly stale under
//! concurrency; the breaker remains the authoritative gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Shortest cool-down accepted from configuration.
pub const MIN_PRIMARY_COOLDOWN: Duration = Duration::from_secs(1);

/// Default cool-down after the primary runs out of capacity.
pub const DEFAULT_PRIMARY_COOLDOWN: Duration = Duration::from_secs(300);

const INACTIVE: u64 = 0;

#[derive(Debug)]
pub struct PrimaryBackoff {
    origin: Instant,
    cooldown: Duration,
    /// Millis since `origin` at which the hint expires, or 0
    until_ms: AtomicU64,
}

impl PrimaryBackoff {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            origin: Instant::now(),
            cooldown: cooldown.max(MIN_PRIMARY_COOLDOWN),
            until_ms: AtomicU64::new(INACTIVE),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps a hint set at the origin distinguishable from INACTIVE
        millis(self.origin.elapsed()).saturating_add(1)
    }

    /// Start (or extend) the cool-down from now.
    pub fn activate(&self) {
        let until = self.now_ms().saturating_add(millis(self.cooldown));
        self.until_ms.store(until, Ordering::Release);
    }

    pub fn clear(&self) {
        self.until_ms.store(INACTIVE, Ordering::Release);
    }

    /// Time left before the primary should be tried again.
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.until_ms.load(Ordering::Acquire);
        if until == INACTIVE {
            return None;
        }
        let now = self.now_ms();
        (until > now).then(|| Duration::from_millis(until - now))
    }

    pub fn is_active(&self) -> bool {
        self.remaining().is_some()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for PrimaryBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_COOLDOWN)
    }
}
