use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use knocker::{
    Header, LastResult, PendingRetry, RetryPolicy, Site, SiteId, SiteStatus, SiteStore,
    ValidationMode, ValidationOutcome,
};
use libsql::params::IntoParams;
use libsql::{Connection, Row, params};
use serde::Serialize;

use crate::pool::{LibsqlManager, LibsqlPool};

const SITE_COLUMNS: &str = "id, name, tags, url, check_interval_ms, network_timeout_ms, \
     validation_mode, validation_args, client_certificate, retry_count, retry_interval_minutes, \
     disabled, status, status_reason, status_at, terminal_status, retry_attempt, retry_at";

/// One stored validation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredResult {
    pub site_id: SiteId,
    pub outcome: ValidationOutcome,
    pub timestamp: DateTime<Utc>,
}

/// LibSQL-backed site and result storage
pub struct SiteRepository {
    pool: LibsqlPool,
}

impl SiteRepository {
    /// Create a new repository from a pool
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    /// Insert a new site; its id is assigned by the database and it starts
    /// out WAITING.
    pub async fn insert_site(&self, site: &Site) -> Result<SiteId> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp_millis();

        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO sites (name, tags, url, check_interval_ms, network_timeout_ms, validation_mode, validation_args, client_certificate, retry_count, retry_interval_minutes, disabled, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                site.name.clone(),
                site.tags.clone(),
                site.url.clone(),
                site.check_interval_ms as i64,
                site.network_timeout_ms as i64,
                site.validation_mode.value(),
                site.validation_args.clone(),
                site.client_certificate.as_ref().map(|path| path.to_string_lossy().into_owned()),
                i64::from(site.retry_policy.count),
                i64::from(site.retry_policy.interval_minutes),
                if site.disabled { 1 } else { 0 },
                SiteStatus::Waiting.value(),
                now,
                now
            ],
        )
        .await?;
        let site_id = tx.last_insert_rowid();

        for (position, header) in site.headers.iter().enumerate() {
            tx.execute(
                "INSERT INTO site_headers (site_id, position, key, value) VALUES (?, ?, ?, ?)",
                params![site_id, position as i64, header.key.clone(), header.value.clone()],
            )
            .await?;
        }
        tx.commit().await?;

        Ok(SiteId(site_id))
    }

    pub async fn get_site(&self, site_id: SiteId) -> Result<Option<Site>> {
        let conn = self.get_conn().await?;
        let sites = load_sites(&conn, "WHERE id = ?", params![site_id.0]).await?;
        Ok(sites.into_iter().next())
    }

    /// All sites, enabled or not, by id
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let conn = self.get_conn().await?;
        load_sites(&conn, "", ()).await
    }

    /// Returns false when no such site exists
    pub async fn set_disabled(&self, site_id: SiteId, disabled: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE sites SET disabled = ?, updated_at = ? WHERE id = ?",
                params![if disabled { 1 } else { 0 }, Utc::now().timestamp_millis(), site_id.0],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Delete a site with its headers and history
    pub async fn delete_site(&self, site_id: SiteId) -> Result<bool> {
        let conn = self.get_conn().await?;

        // Foreign keys are off by default in SQLite; remove children by hand
        let tx = conn.transaction().await?;
        tx.execute("DELETE FROM site_headers WHERE site_id = ?", params![site_id.0]).await?;
        tx.execute("DELETE FROM validation_results WHERE site_id = ?", params![site_id.0]).await?;
        let deleted = tx.execute("DELETE FROM sites WHERE id = ?", params![site_id.0]).await?;
        tx.commit().await?;

        Ok(deleted > 0)
    }

    /// Most recent outcomes first
    pub async fn recent_results(&self, site_id: SiteId, limit: usize) -> Result<Vec<StoredResult>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT kind, attempt, next_attempt_at, reason, timestamp FROM validation_results WHERE site_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
                params![site_id.0, limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(0)?;
            let reason: Option<String> = row.get(3)?;
            let outcome = match kind.as_str() {
                "success" => ValidationOutcome::Success,
                "retry_scheduled" => ValidationOutcome::RetryScheduled {
                    attempt: row.get::<Option<i64>>(1)?.unwrap_or_default() as u32,
                    next_attempt_at: from_millis(row.get::<Option<i64>>(2)?.unwrap_or_default())?,
                    reason: reason.unwrap_or_default(),
                },
                "failed" => ValidationOutcome::Failed { reason: reason.unwrap_or_default() },
                other => return Err(anyhow!("unknown result kind {other:?}")),
            };

            results.push(StoredResult { site_id, outcome, timestamp: from_millis(row.get(4)?)? });
        }

        Ok(results)
    }

    /// Delete stored outcomes recorded before `older_than`. The current
    /// status of each site lives on the site row and is not affected.
    pub async fn prune_results(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM validation_results WHERE timestamp < ?",
                params![older_than.timestamp_millis()],
            )
            .await?;
        Ok(deleted)
    }
}

#[async_trait]
impl SiteStore for SiteRepository {
    async fn list_active_sites(&self) -> Result<Vec<Site>> {
        let conn = self.get_conn().await?;
        load_sites(&conn, "WHERE disabled = 0", ()).await
    }

    async fn record_result(
        &self,
        site_id: SiteId,
        outcome: &ValidationOutcome,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        let at = timestamp.timestamp_millis();
        let reason = outcome.reason().map(str::to_string);
        let (kind, attempt, next_attempt_at) = match outcome {
            ValidationOutcome::Success => ("success", None, None),
            ValidationOutcome::RetryScheduled { attempt, next_attempt_at, .. } => (
                "retry_scheduled",
                Some(i64::from(*attempt)),
                Some(next_attempt_at.timestamp_millis()),
            ),
            ValidationOutcome::Failed { .. } => ("failed", None, None),
        };

        let terminal_status = outcome.is_terminal().then(|| outcome.status().value());

        let tx = conn.transaction().await?;
        tx.execute(
            "UPDATE sites SET status = ?, status_reason = ?, status_at = ?, terminal_status = COALESCE(?, terminal_status), retry_attempt = ?, retry_at = ? WHERE id = ?",
            params![
                outcome.status().value(),
                reason.clone(),
                at,
                terminal_status,
                attempt,
                next_attempt_at,
                site_id.0
            ],
        )
        .await?;
        tx.execute(
            "INSERT INTO validation_results (site_id, kind, status, attempt, next_attempt_at, reason, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![site_id.0, kind, outcome.status().value(), attempt, next_attempt_at, reason, at],
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Leaves `status_at`, the terminal status and any pending retry alone
    /// so reconciliation keeps measuring from the last real result
    async fn mark_checking(&self, site_id: SiteId) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE sites SET status = ? WHERE id = ?",
            params![SiteStatus::Checking.value(), site_id.0],
        )
        .await?;
        Ok(())
    }
}

async fn load_sites(conn: &Connection, filter: &str, params: impl IntoParams) -> Result<Vec<Site>> {
    let mut rows =
        conn.query(&format!("SELECT {SITE_COLUMNS} FROM sites {filter} ORDER BY id"), params).await?;

    let mut sites = Vec::new();
    while let Some(row) = rows.next().await? {
        sites.push(site_from_row(&row)?);
    }
    if sites.is_empty() {
        return Ok(sites);
    }

    let mut headers = load_headers(conn).await?;
    for site in &mut sites {
        site.headers = headers.remove(&site.id.0).unwrap_or_default();
    }
    Ok(sites)
}

async fn load_headers(conn: &Connection) -> Result<HashMap<i64, Vec<Header>>> {
    let mut rows = conn
        .query("SELECT site_id, key, value FROM site_headers ORDER BY site_id, position", ())
        .await?;

    let mut headers: HashMap<i64, Vec<Header>> = HashMap::new();
    while let Some(row) = rows.next().await? {
        let site_id: i64 = row.get(0)?;
        headers
            .entry(site_id)
            .or_default()
            .push(Header::new(row.get::<String>(1)?, row.get::<String>(2)?));
    }
    Ok(headers)
}

fn site_from_row(row: &Row) -> Result<Site> {
    let id = SiteId(row.get(0)?);

    let mode: i64 = row.get(6)?;
    let validation_mode = ValidationMode::from_value(mode)
        .ok_or_else(|| anyhow!("site {id} has unknown validation mode {mode}"))?;

    let status: i64 = row.get(12)?;
    let status = SiteStatus::from_value(status)
        .ok_or_else(|| anyhow!("site {id} has unknown status {status}"))?;
    let reason: Option<String> = row.get(13)?;
    let terminal_status = match row.get::<Option<i64>>(15)? {
        Some(value) => Some(
            SiteStatus::from_value(value)
                .ok_or_else(|| anyhow!("site {id} has unknown terminal status {value}"))?,
        ),
        None => None,
    };
    let pending_retry = match (row.get::<Option<i64>>(16)?, row.get::<Option<i64>>(17)?) {
        (Some(attempt), Some(at)) => {
            Some(PendingRetry { attempt: attempt as u32, at: from_millis(at)? })
        }
        _ => None,
    };
    let last_result = match row.get::<Option<i64>>(14)? {
        Some(at) => Some(LastResult {
            status,
            reason,
            timestamp: from_millis(at)?,
            terminal_status,
            pending_retry,
        }),
        None => None,
    };

    Ok(Site {
        id,
        name: row.get(1)?,
        tags: row.get(2)?,
        url: row.get(3)?,
        check_interval_ms: row.get::<i64>(4)? as u64,
        network_timeout_ms: row.get::<i64>(5)? as u64,
        validation_mode,
        validation_args: row.get(7)?,
        headers: Vec::new(),
        client_certificate: row.get::<Option<String>>(8)?.map(PathBuf::from),
        retry_policy: RetryPolicy::new(
            row.get::<i64>(9)? as u32,
            row.get::<i64>(10)? as u32,
        ),
        disabled: row.get::<i64>(11)? != 0,
        last_result,
    })
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| anyhow!("timestamp {millis} out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_database;

    async fn repository() -> (SiteRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repository = open_database(&dir.path().join("knocker.db"), 4).await.unwrap();
        (repository, dir)
    }

    fn site() -> Site {
        Site::new(SiteId(0), "Example", "https://example.com")
            .with_interval_ms(30_000)
            .with_timeout_ms(2_000)
            .with_validation(ValidationMode::TermSearch, Some("Welcome".to_string()))
            .with_retry_policy(RetryPolicy::new(2, 5))
            .with_tags("prod, web")
            .with_header("Accept", "text/html")
            .with_header("X-Twice", "a")
            .with_header("X-Twice", "b")
    }

    #[tokio::test]
    async fn test_insert_and_get_site() {
        let (repository, _dir) = repository().await;
        let id = repository.insert_site(&site()).await.unwrap();

        let stored = repository.get_site(id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.name, "Example");
        assert_eq!(stored.check_interval_ms, 30_000);
        assert_eq!(stored.validation_mode, ValidationMode::TermSearch);
        assert_eq!(stored.validation_args.as_deref(), Some("Welcome"));
        assert_eq!(stored.retry_policy, RetryPolicy::new(2, 5));
        assert_eq!(stored.headers, site().headers);
        assert_eq!(stored.last_result, None);

        assert!(repository.get_site(SiteId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_sites_skip_disabled() {
        let (repository, _dir) = repository().await;
        let first = repository.insert_site(&site()).await.unwrap();
        let second = repository.insert_site(&site()).await.unwrap();

        assert!(repository.set_disabled(second, true).await.unwrap());
        assert!(!repository.set_disabled(SiteId(999), true).await.unwrap());

        let active = repository.list_active_sites().await.unwrap();
        assert_eq!(active.iter().map(|site| site.id).collect::<Vec<_>>(), vec![first]);
        assert_eq!(repository.list_sites().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_result_updates_status_and_history() {
        let (repository, _dir) = repository().await;
        let id = repository.insert_site(&site()).await.unwrap();
        let first_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let second_at = first_at + chrono::Duration::minutes(5);

        let retry = ValidationOutcome::RetryScheduled {
            attempt: 1,
            next_attempt_at: second_at,
            reason: "status 500".to_string(),
        };
        repository.record_result(id, &retry, first_at).await.unwrap();
        repository.mark_checking(id).await.unwrap();

        let checking = repository.get_site(id).await.unwrap().unwrap().last_result.unwrap();
        assert_eq!(checking.status, SiteStatus::Checking);
        assert_eq!(checking.timestamp, first_at);

        let failed = ValidationOutcome::Failed { reason: "status 500".to_string() };
        repository.record_result(id, &failed, second_at).await.unwrap();

        let last = repository.get_site(id).await.unwrap().unwrap().last_result.unwrap();
        assert_eq!(
            last,
            LastResult::new(SiteStatus::Error, Some("status 500".to_string()), second_at)
        );

        let history = repository.recent_results(id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].outcome, failed);
        assert_eq!(history[1].outcome, retry);
    }

    #[tokio::test]
    async fn test_retry_and_checking_keep_terminal_status() {
        let (repository, _dir) = repository().await;
        let id = repository.insert_site(&site()).await.unwrap();
        let failed_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let retry_at = failed_at + chrono::Duration::minutes(10);

        let failed = ValidationOutcome::Failed { reason: "status 500".to_string() };
        repository.record_result(id, &failed, failed_at).await.unwrap();
        let retry = ValidationOutcome::RetryScheduled {
            attempt: 1,
            next_attempt_at: retry_at + chrono::Duration::minutes(5),
            reason: "status 503".to_string(),
        };
        repository.record_result(id, &retry, retry_at).await.unwrap();
        repository.mark_checking(id).await.unwrap();

        let last = repository.get_site(id).await.unwrap().unwrap().last_result.unwrap();
        assert_eq!(last.status, SiteStatus::Checking);
        assert_eq!(last.terminal_status, Some(SiteStatus::Error));
        assert_eq!(
            last.pending_retry,
            Some(PendingRetry { attempt: 1, at: retry_at + chrono::Duration::minutes(5) })
        );

        repository.record_result(id, &ValidationOutcome::Success, Utc::now()).await.unwrap();
        let last = repository.get_site(id).await.unwrap().unwrap().last_result.unwrap();
        assert_eq!(last.terminal_status, Some(SiteStatus::Ok));
        assert_eq!(last.pending_retry, None);
    }

    #[tokio::test]
    async fn test_prune_results_keeps_recent_history() {
        let (repository, _dir) = repository().await;
        let id = repository.insert_site(&site()).await.unwrap();
        let now = Utc::now();
        let old = now - chrono::Duration::days(40);

        let failed = ValidationOutcome::Failed { reason: "status 500".to_string() };
        repository.record_result(id, &failed, old).await.unwrap();
        repository.record_result(id, &ValidationOutcome::Success, old).await.unwrap();
        repository.record_result(id, &ValidationOutcome::Success, now).await.unwrap();

        let deleted = repository.prune_results(now - chrono::Duration::days(30)).await.unwrap();
        assert_eq!(deleted, 2);

        let history = repository.recent_results(id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp.timestamp_millis(), now.timestamp_millis());
        assert_eq!(
            repository.get_site(id).await.unwrap().unwrap().last_result.unwrap().status,
            SiteStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_delete_site_removes_everything() {
        let (repository, _dir) = repository().await;
        let id = repository.insert_site(&site()).await.unwrap();
        repository.record_result(id, &ValidationOutcome::Success, Utc::now()).await.unwrap();

        assert!(repository.delete_site(id).await.unwrap());
        assert!(!repository.delete_site(id).await.unwrap());
        assert!(repository.get_site(id).await.unwrap().is_none());
        assert!(repository.recent_results(id, 10).await.unwrap().is_empty());
    }
}
