//! Injectable time source.
//!
//! All TTL and idle comparisons in the crate go through a single monotonic
//! "now" supplied per call, so tests can drive expiry deterministically.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Real monotonic clock, measured from process start.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Mock clock for tests, advanced manually.
///
/// Cloning shares the underlying time, so a clone handed to an aggregator
/// can be advanced from the test body.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    current_ms: Arc<Mutex<u64>>,
}

impl MockClock {
    /// Creates a mock clock starting at 0 ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock clock starting at the given millisecond value.
    pub fn starting_at(ms: u64) -> Self {
        Self {
            current_ms: Arc::new(Mutex::new(ms)),
        }
    }

    /// Advances the mock clock by the given number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        let mut current = self.current_ms.lock().unwrap_or_else(|e| e.into_inner());
        *current += ms;
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        *self.current_ms.lock().unwrap_or_else(|e| e.into_inner())
    }
}
