use thiserror::Error;

use crate::site::SiteId;

/// Why a single validation attempt did not pass.
///
/// Every failure inside a job is normalized into one of these; only
/// [`ValidationError::Configuration`] is permanent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Site is misconfigured (empty search term, malformed URL, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// DNS, connect, TLS, timeout or redirect problems.
    #[error("network error: {0}")]
    Transport(String),

    /// The response was received but did not pass the validator.
    #[error("{0}")]
    Validator(String),
}

impl ValidationError {
    /// Whether the retry policy applies to this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ValidationError::Configuration(_))
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Per-site bookkeeping went wrong; the site is dropped from the schedule
    /// until the next reconciliation.
    #[error("internal scheduler error for site {site_id}: {message}")]
    Internal { site_id: SiteId, message: String },

    #[error("site store failed: {0:#}")]
    Store(#[from] anyhow::Error),
}
