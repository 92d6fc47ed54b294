use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted status of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Never checked, or waiting for a retry
    Waiting,
    /// A validation job is running
    Checking,
    Ok,
    Error,
}

impl SiteStatus {
    /// Stable numeric code used by stores
    pub fn value(self) -> i64 {
        match self {
            SiteStatus::Waiting => 1,
            SiteStatus::Checking => 2,
            SiteStatus::Ok => 3,
            SiteStatus::Error => 4,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(SiteStatus::Waiting),
            2 => Some(SiteStatus::Checking),
            3 => Some(SiteStatus::Ok),
            4 => Some(SiteStatus::Error),
            _ => None,
        }
    }

    /// `Ok` and `Error` are the only states a terminal outcome leaves behind
    pub fn is_terminal(self) -> bool {
        matches!(self, SiteStatus::Ok | SiteStatus::Error)
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiteStatus::Waiting => write!(f, "waiting"),
            SiteStatus::Checking => write!(f, "checking"),
            SiteStatus::Ok => write!(f, "ok"),
            SiteStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of one validation job execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Success,

    /// The attempt failed but the retry policy allows another one
    RetryScheduled {
        /// 1-based retry number
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        /// Why the attempt that triggered this retry failed
        reason: String,
    },

    Failed {
        reason: String,
    },
}

impl ValidationOutcome {
    /// `Success` and `Failed` end a retry cycle; `RetryScheduled` does not
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ValidationOutcome::RetryScheduled { .. })
    }

    /// Status a store should persist for this outcome
    pub fn status(&self) -> SiteStatus {
        match self {
            ValidationOutcome::Success => SiteStatus::Ok,
            ValidationOutcome::RetryScheduled { .. } => SiteStatus::Waiting,
            ValidationOutcome::Failed { .. } => SiteStatus::Error,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Success => None,
            ValidationOutcome::RetryScheduled { reason, .. }
            | ValidationOutcome::Failed { reason } => Some(reason),
        }
    }
}

impl std::fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationOutcome::Success => write!(f, "success"),
            ValidationOutcome::RetryScheduled { attempt, next_attempt_at, reason } => {
                write!(f, "retry #{attempt} at {} ({reason})", next_attempt_at.to_rfc3339())
            }
            ValidationOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
