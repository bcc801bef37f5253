use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

/// Exponential backoff between attempts, optionally jittered.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add a random extra wait on top of each backoff step
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pauses between attempts: one fewer than the attempts, doubling up to `max_delay`.
    pub fn schedule(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.attempts() as usize - 1);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `op` until it succeeds or the attempts are used up; the last error is returned.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.attempts();
        let attempt = AtomicU32::new(0);

        (|| op(attempt.fetch_add(1, Ordering::Relaxed) + 1))
            .retry(self.schedule())
            .sleep(tokio::time::sleep)
            .notify(|e: &E, pause: Duration| {
                warn!(
                    attempt = attempt.load(Ordering::Relaxed),
                    max_attempts,
                    backoff_ms = pause.as_millis() as u64,
                    "Attempt failed, retrying: {}",
                    e
                );
            })
            .await
    }
}
