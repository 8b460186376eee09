//! Rate limiting for repeated log lines
//!
//! Worker loops hit the same failure many times a second when a device
//! disappears or a stream stalls. The throttler lets the first occurrence of a
//! key through, swallows repeats for an interval, and reports how many were
//! swallowed when the key is let through again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Per-key log rate limiter
///
/// ```rust
/// use std::time::Duration;
/// use vidrelay::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("read_failed"));
/// assert!(!throttler.should_log("read_failed"));
/// ```
#[derive(Debug)]
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when `key` may be logged now, where
    /// `suppressed` counts the repeats swallowed since it was last logged.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = state.suppressed;
                *state = KeyState {
                    last_logged: now,
                    suppressed: 0,
                };
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Forget `key` so its next occurrence logs immediately (call on recovery)
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.keys.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// `tracing::warn!` gated by a [`LogThrottler`] key; adds a `suppressed` field
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::warn!(suppressed, $($arg)*);
        }
    };
}

/// `tracing::error!` gated by a [`LogThrottler`] key; adds a `suppressed` field
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::error!(suppressed, $($arg)*);
        }
    };
}
