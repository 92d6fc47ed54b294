//! Automatic retention of validation result history.
//!
//! Each site's current status lives on the site row; only the per-outcome
//! history is pruned. Cleanup runs from the service loop on its own interval.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::database::SiteRepository;

/// How long stored outcomes are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Days to keep validation results; zero keeps them forever
    pub result_days: u32,
    pub cleanup_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { result_days: 30, cleanup_interval: Duration::from_secs(3600) }
    }
}

impl RetentionPolicy {
    /// Results recorded before this instant are expired
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.result_days > 0).then(|| now - chrono::Duration::days(i64::from(self.result_days)))
    }
}

/// Delete expired results, returning how many rows went away
pub async fn cleanup_expired_results(
    repository: &SiteRepository,
    policy: &RetentionPolicy,
) -> Result<u64> {
    let Some(cutoff) = policy.cutoff(Utc::now()) else {
        debug!("result retention disabled, skipping cleanup");
        return Ok(0);
    };

    let deleted = repository.prune_results(cutoff).await?;
    if deleted > 0 {
        info!(deleted, result_days = policy.result_days, "expired validation results deleted");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_database;
    use knocker::{Site, SiteId, SiteStore, ValidationOutcome};

    #[test]
    fn test_retention_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.result_days, 30);
        assert_eq!(policy.cleanup_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_cutoff() {
        let now = Utc::now();
        let policy = RetentionPolicy { result_days: 7, ..RetentionPolicy::default() };
        assert_eq!(policy.cutoff(now), Some(now - chrono::Duration::days(7)));

        let forever = RetentionPolicy { result_days: 0, ..RetentionPolicy::default() };
        assert_eq!(forever.cutoff(now), None);
    }

    #[tokio::test]
    async fn test_cleanup_respects_disabled_retention() {
        let dir = tempfile::tempdir().unwrap();
        let repository = open_database(&dir.path().join("knocker.db"), 2).await.unwrap();
        let id = repository
            .insert_site(&Site::new(SiteId(0), "Old", "https://old.test"))
            .await
            .unwrap();
        let long_ago = Utc::now() - chrono::Duration::days(400);
        repository.record_result(id, &ValidationOutcome::Success, long_ago).await.unwrap();

        let forever = RetentionPolicy { result_days: 0, ..RetentionPolicy::default() };
        assert_eq!(cleanup_expired_results(&repository, &forever).await.unwrap(), 0);
        assert_eq!(repository.recent_results(id, 10).await.unwrap().len(), 1);

        let policy = RetentionPolicy::default();
        assert_eq!(cleanup_expired_results(&repository, &policy).await.unwrap(), 1);
        assert!(repository.recent_results(id, 10).await.unwrap().is_empty());
    }
}
