//! Retry policies and readiness polling.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How many times to try something, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Fixed backoff. At least one attempt is always made.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Outcome of [`await_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The probe succeeded on attempt `attempts`.
    Ready { attempts: u32 },
    /// Every attempt failed.
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Run `probe` until it succeeds or the policy's attempts run out.
///
/// The probe receives the 1-based attempt number. There is no sleep after
/// the final attempt.
pub async fn await_ready<F, Fut, E>(policy: &RetryPolicy, mut probe: F) -> Readiness
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await {
            Ok(()) => return Readiness::Ready { attempts: attempt },
            Err(e) => {
                tracing::debug!("readiness probe {}/{} failed: {}", attempt, policy.max_attempts, e);
                last_error = Some(e.to_string());
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Readiness::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}
