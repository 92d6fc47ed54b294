//! Consecutive-failure accounting against a site's retry policy.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::site::RetryPolicy;
use crate::types::ValidationOutcome;

/// Tracks consecutive failed attempts for a single site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTracker {
    consecutive_failures: u32,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker resumed at a known failure count, e.g. a retry restored from
    /// the store.
    pub fn with_failures(consecutive_failures: u32) -> Self {
        Self { consecutive_failures }
    }

    /// Current number of retries consumed in this cycle.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record one attempt and return the outcome to report.
    ///
    /// Retryable failures consume one retry while `consecutive_failures <
    /// policy.count`; the next failure is terminal and starts a fresh cycle.
    /// Configuration errors are terminal immediately.
    pub fn record(
        &mut self,
        verdict: Result<(), ValidationError>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        let error = match verdict {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    debug!(failures = self.consecutive_failures, "validation recovered");
                }
                self.consecutive_failures = 0;
                return ValidationOutcome::Success;
            }
            Err(error) => error,
        };

        if error.is_retryable() && self.consecutive_failures < policy.count {
            self.consecutive_failures += 1;
            return ValidationOutcome::RetryScheduled {
                attempt: self.consecutive_failures,
                next_attempt_at: now + policy.interval(),
                reason: error.to_string(),
            };
        }

        warn!(
            failures = self.consecutive_failures,
            retries = policy.count,
            reason = %error,
            "validation failed"
        );
        self.consecutive_failures = 0;
        ValidationOutcome::Failed { reason: error.to_string() }
    }
}
