//! In-process [`SiteStore`] for embedding and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::sink::SiteStore;
use crate::site::{LastResult, Site, SiteId};
use crate::types::ValidationOutcome;

/// One recorded outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResult {
    pub site_id: SiteId,
    pub outcome: ValidationOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Keeps every recorded outcome for the life of the store, so it suits
/// tests and short-lived embedding rather than long-running services.
#[derive(Default)]
pub struct MemoryStore {
    sites: RwLock<BTreeMap<SiteId, Site>>,
    history: RwLock<Vec<RecordedResult>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RecordedResult>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a site
    pub fn put_site(&self, site: Site) {
        if let Ok(mut sites) = self.sites.write() {
            sites.insert(site.id, site);
        }
    }

    pub fn remove_site(&self, site_id: SiteId) -> Option<Site> {
        self.sites.write().ok()?.remove(&site_id)
    }

    pub fn site(&self, site_id: SiteId) -> Option<Site> {
        self.sites.read().ok()?.get(&site_id).cloned()
    }

    /// Every outcome recorded so far, oldest first
    pub fn history(&self) -> Vec<RecordedResult> {
        self.history.read().map(|history| history.clone()).unwrap_or_default()
    }

    /// Stream of outcomes recorded after this call
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RecordedResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn update_last_result(
        &self,
        site_id: SiteId,
        update: impl FnOnce(Option<&LastResult>) -> Option<LastResult>,
    ) {
        if let Ok(mut sites) = self.sites.write() {
            if let Some(site) = sites.get_mut(&site_id) {
                site.last_result = update(site.last_result.as_ref());
            }
        }
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn list_active_sites(&self) -> Result<Vec<Site>> {
        let sites = self.sites.read().map_err(|_| anyhow!("site table lock poisoned"))?;
        Ok(sites.values().filter(|site| !site.disabled).cloned().collect())
    }

    async fn record_result(
        &self,
        site_id: SiteId,
        outcome: &ValidationOutcome,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.update_last_result(site_id, |previous| {
            Some(LastResult::after(previous, outcome, timestamp))
        });

        let record = RecordedResult { site_id, outcome: outcome.clone(), timestamp };
        self.history
            .write()
            .map_err(|_| anyhow!("history lock poisoned"))?
            .push(record.clone());

        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(record.clone()).is_ok());
        }
        Ok(())
    }

    async fn mark_checking(&self, site_id: SiteId) -> Result<()> {
        // Checking is transient; a site that was never checked stays without
        // a result so reconciliation still treats it as due.
        self.update_last_result(site_id, |previous| previous.map(LastResult::checking));
        Ok(())
    }
}
