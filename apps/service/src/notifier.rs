use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use knocker::{Notifier, SiteId};
use tracing::{debug, info, warn};

/// Reports terminal transitions through the log.
///
/// While muted, notifications are dropped; scheduling is unaffected.
#[derive(Debug, Default)]
pub struct LogNotifier {
    muted: AtomicBool,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn success(&self, site_id: SiteId) -> Result<()> {
        if self.is_muted() {
            debug!(%site_id, "recovery notification muted");
            return Ok(());
        }
        info!(%site_id, "site recovered");
        Ok(())
    }

    async fn failure(&self, site_id: SiteId, reason: &str) -> Result<()> {
        if self.is_muted() {
            debug!(%site_id, "failure notification muted");
            return Ok(());
        }
        warn!(%site_id, %reason, "site validation failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_muting_never_errors() {
        let notifier = LogNotifier::new();
        assert!(!notifier.is_muted());

        notifier.set_muted(true);
        assert!(notifier.is_muted());
        assert!(notifier.failure(SiteId(1), "status 500").await.is_ok());
        assert!(notifier.success(SiteId(1)).await.is_ok());
    }
}
