use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::KiraError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `op` with the 1-based attempt number until it succeeds, fails with a
/// non-transient error, or the attempt budget runs out. Only 5xx statuses are
/// retried; network and client errors return on the first attempt.
pub fn send_with_retries<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, KiraError>
where
    F: FnMut(u32) -> Result<T, KiraError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    "Entrez server error ({err}); retrying ({attempt}/{max_attempts}) in {}s",
                    policy.delay.as_secs()
                );
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
                attempt += 1;
            }
            Err(KiraError::EntrezStatus {
                status, message, ..
            }) => {
                return Err(KiraError::EntrezStatus {
                    status,
                    attempts: attempt,
                    message,
                });
            }
            Err(err) => return Err(err),
        }
    }
}
