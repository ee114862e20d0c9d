//! Log throttling utility
//!
//! A reconnect loop against a dead camera produces the same pipeline error
//! every few seconds. The throttler keeps one line per stream per interval.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter for repeated log lines, keyed by an arbitrary string
/// (normally the stream URI)
///
/// Uses the tokio clock, so paused-time tests see the throttle window move
/// with `tokio::time::advance`.
///
/// # Example
///
/// ```rust
/// use cam_viewer::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(30));
///
/// assert!(throttler.should_log("rtsp://door/live"));
/// assert!(!throttler.should_log("rtsp://door/live"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a line for `key` may be logged now, and records it.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget `key`, so the next failure for it is logged immediately.
    ///
    /// Called once a stream plays again.
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.last_logged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 30 second window, long enough to cover several reconnect attempts
    fn default() -> Self {
        Self::with_secs(30)
    }
}

/// Throttled `tracing::warn!`
///
/// # Example
///
/// ```rust
/// use cam_viewer::utils::LogThrottler;
/// use cam_viewer::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// let uri = "rtsp://door/live";
/// warn_throttled!(throttler, uri, "Playback error on {}: {}", uri, "timeout");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}
