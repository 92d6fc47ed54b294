use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::checker::{ProbeRequest, Prober};
use crate::error::ValidationError;
use crate::retry::RetryTracker;
use crate::site::{Site, ValidationMode};
use crate::types::ValidationOutcome;
use crate::validation::validate_validation_args;
use crate::validators::{ScriptSandbox, status_code, term_search};

/// What one validation job produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub outcome: ValidationOutcome,
    /// Retry state to carry into the next job
    pub tracker: RetryTracker,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Validation executor - runs individual validation jobs
pub struct ValidationExecutor {
    prober: Arc<dyn Prober>,
    sandbox: ScriptSandbox,
}

impl ValidationExecutor {
    /// Create a new validation executor
    pub fn new(prober: Arc<dyn Prober>, sandbox: ScriptSandbox) -> Self {
        Self { prober, sandbox }
    }

    /// Probe the site and judge the response; never panics or errors out
    /// beyond the returned verdict.
    pub async fn attempt(&self, site: &Site) -> Result<(), ValidationError> {
        validate_validation_args(site.validation_mode, site.validation_args.as_deref())
            .to_result()
            .map_err(|e| ValidationError::Configuration(e.to_string()))?;

        let response = self.prober.probe(&ProbeRequest::for_site(site)).await?;

        match site.validation_mode {
            ValidationMode::StatusCode => status_code::validate(response.status),
            ValidationMode::TermSearch => {
                term_search::validate(site.validation_args.as_deref(), &response)
            }
            ValidationMode::JavaScript => {
                let script = site.validation_args.as_deref().unwrap_or_default();
                self.sandbox.validate(script, &response).await
            }
        }
    }

    /// Execute one validation job for `site` starting from `tracker`
    pub async fn execute(&self, site: &Site, tracker: RetryTracker) -> JobReport {
        let start = Instant::now();
        let verdict = self.attempt(site).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let finished_at = Utc::now();
        let (outcome, tracker) = settle(site, verdict, tracker, finished_at);
        debug!(site_id = %site.id, %outcome, latency_ms, "validation job finished");

        JobReport { outcome, tracker, finished_at, latency_ms }
    }
}

/// Merge an attempt's verdict with the retry state.
///
/// Pure: the same inputs always give the same outcome and next state.
pub fn settle(
    site: &Site,
    verdict: Result<(), ValidationError>,
    tracker: RetryTracker,
    now: DateTime<Utc>,
) -> (ValidationOutcome, RetryTracker) {
    let mut tracker = tracker;
    let outcome = tracker.record(verdict, &site.retry_policy, now);
    (outcome, tracker)
}
