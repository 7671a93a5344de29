//! Process-wide monotonic clock abstraction.
//!
//! Every component that deals in timeouts or settling times (the
//! arbitrator's expiry, the smoother's settling window, the driver's retry
//! timer) reads "now" through this module instead of `Instant::now()`
//! directly, so a test can substitute a deterministic clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Milliseconds, monotonic, process start-relative.
pub type Millis = i64;

static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Milliseconds elapsed since the clock was first read in this process.
///
/// Initializes the epoch on first call; every instance in the process
/// shares it, per spec.md's "internal monotonic clock abstraction are
/// process-wide" note.
pub fn now_ms() -> Millis {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as Millis
}

/// A clock that can be overridden in tests, while defaulting to the real
/// monotonic clock in production.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// The production clock, backed by [`now_ms`].
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        now_ms()
    }
}

/// A fixed, manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct TestClock {
    now: AtomicI64,
}

impl TestClock {
    pub fn new(start_ms: Millis) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: Millis) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: Millis) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(40);
        assert_eq!(clock.now_ms(), 1_040);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let a = SystemClock.now_ms();
        let b = SystemClock.now_ms();
        assert!(b >= a);
    }
}
