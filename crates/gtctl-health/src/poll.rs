//! Bounded fixed-interval polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often and for how long to retry a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between consecutive checks.
    pub interval: Duration,
    /// Overall budget measured from the first check.
    pub timeout: Option<Duration>,
    /// Maximum number of checks.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

    /// 500 ms interval, 60 s budget.
    pub fn readiness() -> Self {
        Self {
            interval: Self::DEFAULT_READINESS_INTERVAL,
            timeout: Some(Self::DEFAULT_READINESS_TIMEOUT),
            max_attempts: None,
        }
    }

    /// 10 attempts, 1 s apart.
    pub fn leader() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: None,
            max_attempts: Some(10),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("not ready after {elapsed:?} ({attempts} checks)")]
    Timeout { elapsed: Duration, attempts: u32 },

    #[error("not ready after {attempts} checks")]
    Exhausted { attempts: u32 },

    #[error("polling cancelled after {attempts} checks")]
    Cancelled { attempts: u32 },
}

/// Run `check` until it returns true, the policy is used up, or `cancel`
/// fires. Returns the number of checks performed.
///
/// Cancellation is observed while a check is in flight as well as between
/// checks, so a cancelled poll returns within one interval.
pub async fn poll_until<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<u32, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline = policy.timeout.map(|t| started + t);
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled { attempts });
        }

        attempts += 1;
        let ready = tokio::select! {
            ready = check() => ready,
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
        };
        if ready {
            return Ok(attempts);
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::Exhausted { attempts });
        }

        let now = Instant::now();
        let mut wake = now + policy.interval;
        if let Some(deadline) = deadline {
            if now >= deadline {
                return Err(PollError::Timeout {
                    elapsed: now - started,
                    attempts,
                });
            }
            wake = wake.min(deadline);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
        }
    }
}
