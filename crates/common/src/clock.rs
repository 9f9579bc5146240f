//! Injectable time source
//!
//! Credential expiry is wall-clock (JWT `exp` is unix seconds) while circuit
//! cooldowns are monotonic. `Clock` exposes both so that tests can drive the
//! credential manager and the failure gate from a single `MockClock`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant, used for cooldown deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock time as unix seconds, used for credential expiry.
    fn unix_now(&self) -> u64;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn unix_now(&self) -> u64 {
        (**self).unix_now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same elapsed counter, so a test can hand one clone to the
/// component under test and advance time through another.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    unix_start: u64,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Start the mock at the given unix timestamp (seconds).
    pub fn at_unix(unix_start: u64) -> Self {
        Self {
            start: Instant::now(),
            unix_start,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at_unix(1_700_000_000)
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn unix_now(&self) -> u64 {
        self.unix_start + self.elapsed().as_secs()
    }
}
