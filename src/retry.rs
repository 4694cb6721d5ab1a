//! Transient-fault retry policy
//!
//! Shared by the agent's sender workers and the SQLite backend. The policy
//! makes a fixed number of attempts and sleeps according to a progressive
//! table between them (1s, 3s, 5s). A predicate decides which errors are
//! worth another attempt; anything else is returned immediately without
//! consuming further attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Maximum number of attempts (first try included)
pub const ATTEMPTS: usize = 3;

/// Delay after a failed attempt, indexed by attempt number
pub const DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: usize,
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: ATTEMPTS,
            delays: DELAYS.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Custom attempt budget and delay table
    ///
    /// Attempts beyond the end of `delays` reuse its last entry.
    pub fn new(attempts: usize, delays: Vec<Duration>) -> Self {
        Self {
            attempts: attempts.max(1),
            delays,
        }
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        self.delays
            .get(attempt)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Run `op` until it succeeds, the predicate rejects its error, or the
    /// attempt budget is spent
    ///
    /// The last error is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !should_retry(&e) => return Err(e),
                Err(e) if attempt + 1 >= self.attempts => {
                    error!("attempt {attempt} failed, giving up: {e}");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay(attempt);
                    warn!("attempt {attempt} failed, retrying in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// [`RetryPolicy::run`] retrying on every error
    pub async fn run_always<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(op, |_| true).await
    }
}
