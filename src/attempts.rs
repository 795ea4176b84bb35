//! Per-client throttling of failed authentication attempts.
//!
//! Each client keeps the instants of its recent attempts. Entries older than
//! the window are pruned lazily whenever the client is evaluated; once the
//! remaining count reaches the threshold further attempts are refused until
//! enough of them age out. This is a fixed window with pruning, so a burst
//! straddling a window boundary can see up to twice the threshold.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Attempts allowed per client within one window.
pub const DEFAULT_THRESHOLD: usize = 5;

/// Length of the throttling window: 15 minutes.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Map size above which idle clients are swept during a `permit` call.
const SWEEP_THRESHOLD: usize = 10_000;

/// Throttle consulted whenever a client presents a bad credential.
///
/// Implementations must apply the prune/compare/record sequence for a client
/// atomically: concurrent calls must never admit more than the threshold.
#[async_trait]
pub trait AttemptLimiter: Send + Sync {
    /// Record an attempt for `client_id` if it is still under the threshold.
    /// Returns `false` (and records nothing) once the client is throttled.
    async fn permit(&self, client_id: &str) -> bool;

    /// Whether `client_id` is currently throttled. Never records an attempt.
    async fn is_blocked(&self, client_id: &str) -> bool;

    /// Window length, used as the retry hint for throttled clients.
    fn window(&self) -> Duration;
}

/// Process-local attempt limiter. State is lost on restart.
pub struct InMemoryAttemptLimiter {
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
    threshold: usize,
    window: Duration,
}

impl Default for InMemoryAttemptLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_WINDOW)
    }
}

impl InMemoryAttemptLimiter {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            threshold,
            window,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.attempts.lock().len()
    }

    fn prune(record: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = record.front() {
            if now.duration_since(oldest) >= window {
                record.pop_front();
            } else {
                break;
            }
        }
    }

    fn sweep(attempts: &mut HashMap<String, VecDeque<Instant>>, now: Instant, window: Duration) {
        attempts.retain(|_, record| {
            record
                .back()
                .is_some_and(|&latest| now.duration_since(latest) < window)
        });
    }

    fn permit_now(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();

        if attempts.len() > SWEEP_THRESHOLD {
            Self::sweep(&mut attempts, now, self.window);
        }

        let record = attempts.entry(client_id.to_string()).or_default();
        Self::prune(record, now, self.window);

        if record.len() >= self.threshold {
            return false;
        }

        record.push_back(now);
        true
    }

    fn is_blocked_now(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();

        let Some(record) = attempts.get_mut(client_id) else {
            return false;
        };
        Self::prune(record, now, self.window);

        if record.is_empty() {
            attempts.remove(client_id);
            return false;
        }
        record.len() >= self.threshold
    }
}

#[async_trait]
impl AttemptLimiter for InMemoryAttemptLimiter {
    async fn permit(&self, client_id: &str) -> bool {
        self.permit_now(client_id)
    }

    async fn is_blocked(&self, client_id: &str) -> bool {
        self.is_blocked_now(client_id)
    }

    fn window(&self) -> Duration {
        self.window
    }
}
