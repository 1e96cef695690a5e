//! Time sources.
//!
//! Freshness is judged against wall-clock time so it survives restarts via the
//! persisted `last_fetch_time`. Alert cooldowns use a monotonic clock so they
//! are immune to wall-clock adjustments.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

pub trait Clock: Send + Sync {
    /// Wall-clock time as epoch milliseconds.
    fn wall_millis(&self) -> i64;

    /// Monotonic milliseconds since an arbitrary fixed origin.
    fn monotonic_millis(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn monotonic_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A clock driven by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    wall: Arc<AtomicI64>,
    monotonic: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(wall_millis: i64) -> Self {
        Self {
            wall: Arc::new(AtomicI64::new(wall_millis)),
            monotonic: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_wall(&self, millis: i64) {
        self.wall.store(millis, Ordering::SeqCst);
    }

    /// Advance both clocks.
    pub fn advance(&self, millis: u64) {
        self.wall.fetch_add(millis as i64, Ordering::SeqCst);
        self.monotonic.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn wall_millis(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }

    fn monotonic_millis(&self) -> u64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(500);
        assert_eq!(other.wall_millis(), 1_500);
        assert_eq!(other.monotonic_millis(), 500);

        other.set_wall(10);
        assert_eq!(clock.wall_millis(), 10);
        assert_eq!(clock.monotonic_millis(), 500);
    }

    #[test]
    fn test_system_clock_monotonic_never_decreases() {
        let clock = SystemClock::new();
        let a = clock.monotonic_millis();
        let b = clock.monotonic_millis();
        assert!(b >= a);
        assert!(clock.wall_millis() > 0);
    }
}
