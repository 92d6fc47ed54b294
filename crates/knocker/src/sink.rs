//! Collaborators that receive validation outcomes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::site::{Site, SiteId};
use crate::types::ValidationOutcome;

/// Durable site configuration and result storage
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Every site that is not disabled
    async fn list_active_sites(&self) -> Result<Vec<Site>>;

    /// Persist the outcome of one validation job
    async fn record_result(
        &self,
        site_id: SiteId,
        outcome: &ValidationOutcome,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// A validation job for the site has been dispatched
    async fn mark_checking(&self, _site_id: SiteId) -> Result<()> {
        Ok(())
    }
}

/// Receives terminal state transitions.
///
/// Calls are fire-and-forget: errors are logged and never affect the
/// schedule.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The site passed after its last terminal result was a failure
    async fn success(&self, site_id: SiteId) -> Result<()>;

    async fn failure(&self, site_id: SiteId, reason: &str) -> Result<()>;
}
