use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Errors that a [`RetryPolicy`] knows how to drive.
pub trait RetryableError: std::error::Error + Sized {
    /// Whether another attempt could plausibly succeed.
    fn is_retryable(&self) -> bool;

    /// Error produced when an attempt exceeds the per-attempt wall-clock limit.
    fn timed_out(stage: &str, limit: Duration) -> Self;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// Delay before retry `n` is `schedule[n - 1]`; the last entry repeats.
    Schedule(Vec<Duration>),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Duration,
    attempt_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter: Duration::ZERO,
            attempt_timeout: None,
        }
    }

    /// One attempt, no delay. Used to put a hard timeout around a single
    /// external invocation.
    pub fn single_attempt() -> Self {
        Self::new(1, Backoff::None)
    }

    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.attempt_timeout = limit;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Schedule(schedule) => schedule
                .get(attempt - 1)
                .or_else(|| schedule.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Runs `operation` until it succeeds, returns a non-retryable error, or
    /// the attempt budget is spent. The closure receives the zero-based
    /// attempt index.
    pub async fn run<F, Fut, T, E>(&self, stage: &str, mut operation: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let mut attempt = 0usize;
        loop {
            let result = match self.attempt_timeout {
                Some(limit) => match timeout(limit, operation(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(E::timed_out(stage, limit)),
                },
                None => operation(attempt).await,
            };

            let error = match result {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    })
                }
                Err(error) => error,
            };

            attempt += 1;
            if !error.is_retryable() || attempt >= self.max_attempts {
                return Err(error);
            }

            let mut delay = self.delay_for_attempt(attempt);
            if !self.jitter.is_zero() {
                let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
                delay += Duration::from_millis(extra);
            }
            warn!(
                stage,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }
}
