//! Periodic keepalive pings.
//!
//! Proxies and load balancers drop idle WebSockets; a `ping` every
//! interval keeps the connection looking busy. Failed pings are logged
//! and otherwise ignored: only a transport close tears a connection down.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace, warn};

use crate::protocol::Method;
use crate::transport::Correlator;

use super::config::MAX_KEEPALIVE_INTERVAL;

// ============================================================================
// Constants
// ============================================================================

/// Shortest accepted interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Keepalive
// ============================================================================

/// A running keepalive timer.
///
/// Cancelled explicitly via [`Keepalive::cancel`] or on drop.
pub struct Keepalive {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Keepalive {
    /// Starts pinging through `correlator` every `interval`.
    ///
    /// The first ping goes out one full interval after start. Each ping
    /// waits for `request_timeout`, but never longer than `interval`.
    /// Intervals outside 1ms..=[`MAX_KEEPALIVE_INTERVAL`] are clamped.
    #[must_use]
    pub fn start(correlator: Correlator, interval: Duration, request_timeout: Duration) -> Self {
        let interval = interval.clamp(MIN_INTERVAL, MAX_KEEPALIVE_INTERVAL);
        let ping_timeout = request_timeout.min(interval);

        let task = tokio::spawn(async move {
            let now = Instant::now();
            let first = now.checked_add(interval).unwrap_or(now);
            let mut ticker = interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match correlator.send(Method::Ping, Vec::new(), ping_timeout).await {
                    Ok(_) => trace!("Keepalive acknowledged"),
                    Err(e) => warn!(error = %e, "Keepalive ping failed"),
                }
            }
        });

        debug!(interval_ms = interval.as_millis() as u64, "Keepalive started");

        Self {
            task: Mutex::new(Some(task)),
        }
    }

    /// Stops the timer. Calling it again is a no-op.
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Keepalive cancelled");
        }
    }

    /// Returns `true` until cancelled.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
