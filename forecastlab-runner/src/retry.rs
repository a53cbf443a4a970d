//! Bounded retry around store calls.
//!
//! Only transient store errors (unreachable, rate limited) are retried. The
//! delay doubles per attempt up to `max_delay_ms`. An optional deadline is
//! checked before every attempt and before every sleep.

use forecastlab_core::store::StoreError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{source} (after {attempts} attempt(s))")]
    Exhausted { source: StoreError, attempts: u32 },

    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded {
        attempts: u32,
        last: Option<StoreError>,
    },
}

impl RetryError {
    /// The last store error, if any call was made.
    pub fn into_store_error(self) -> StoreError {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::DeadlineExceeded { last, .. } => {
                last.unwrap_or_else(|| StoreError::Unreachable("deadline exceeded".into()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total calls including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    /// Run `op`, retrying transient failures.
    pub fn run<T>(
        &self,
        what: &str,
        deadline: Option<Instant>,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, RetryError> {
        let max_attempts = self.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.delay_for(attempt - 1);
                if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                    return Err(RetryError::DeadlineExceeded {
                        attempts: attempt - 1,
                        last,
                    });
                }
                std::thread::sleep(delay);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(RetryError::DeadlineExceeded {
                    attempts: attempt - 1,
                    last,
                });
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(what, attempt, max_attempts, error = %e, "transient store error, retrying");
                    last = Some(e);
                }
                Err(e) => {
                    return Err(RetryError::Exhausted {
                        source: e,
                        attempts: attempt,
                    })
                }
            }
        }

        // Unreachable in practice: the last attempt either returns Ok or Exhausted.
        Err(RetryError::Exhausted {
            source: last.unwrap_or_else(|| StoreError::Unreachable("no attempts made".into())),
            attempts: max_attempts,
        })
    }
}
