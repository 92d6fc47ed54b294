//! Wires the scheduler to the database and keeps it reconciled until
//! shutdown.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use knocker::{
    HttpProber, JobReport, RetryTracker, Scheduler, ScriptSandbox, SiteId, SiteStore,
    ValidationExecutor,
};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{SiteRepository, open_database};
use crate::notifier::LogNotifier;
use crate::retention::cleanup_expired_results;

pub struct Service {
    config: Config,
    repository: Arc<SiteRepository>,
    notifier: Arc<LogNotifier>,
    executor: Arc<ValidationExecutor>,
    scheduler: Scheduler,
}

impl Service {
    /// Open the configured database and build the scheduler around it
    pub async fn new(config: Config) -> Result<Self> {
        // Room for every concurrent job plus the reconciliation pass
        let connections = config.scheduler.max_concurrent_checks + 2;
        let repository = open_database(&config.database.path, connections).await?;
        Self::with_repository(config, Arc::new(repository))
    }

    pub fn with_repository(config: Config, repository: Arc<SiteRepository>) -> Result<Self> {
        let prober = Arc::new(HttpProber::new(config.prober_options())?);
        let executor = Arc::new(ValidationExecutor::new(
            prober,
            ScriptSandbox::new(config.sandbox_limits()),
        ));
        let notifier = Arc::new(LogNotifier::new());
        let scheduler = Scheduler::new(
            Arc::clone(&executor),
            repository.clone(),
            notifier.clone(),
            config.scheduler_options(),
        );

        Ok(Self { config, repository, notifier, executor, scheduler })
    }

    pub fn repository(&self) -> &SiteRepository {
        &self.repository
    }

    pub fn notifier(&self) -> &LogNotifier {
        &self.notifier
    }

    /// Run until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C, stopping");
            }
        })
        .await
    }

    /// Reconcile at startup and then every `reconcile_interval_seconds`
    /// until `shutdown` resolves; pending timers are cancelled on the way out.
    /// Expired result history is pruned on its own interval.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let retention = self.config.retention_policy();
        info!(
            database = %self.config.database.path.display(),
            reconcile_interval_seconds = self.config.scheduler.reconcile_interval_seconds,
            max_concurrent_checks = self.config.scheduler.max_concurrent_checks,
            result_days = retention.result_days,
            "starting validation scheduler"
        );

        let mut interval = tokio::time::interval(self.config.reconcile_interval());
        let mut cleanup = tokio::time::interval(retention.cleanup_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.scheduler.ensure_scheduled_validations().await {
                        warn!(error = %e, "reconciliation failed, retrying next interval");
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = cleanup_expired_results(&self.repository, &retention).await {
                        warn!(error = %e, "result cleanup failed, retrying next interval");
                    }
                }
            }
        }

        self.scheduler.shutdown().await;
        Ok(())
    }

    /// Validate one site immediately, outside of its schedule. The outcome
    /// is recorded like a scheduled one.
    pub async fn check(&self, site_id: SiteId) -> Result<JobReport> {
        let site = self
            .repository
            .get_site(site_id)
            .await?
            .ok_or_else(|| anyhow!("site {site_id} not found"))?;

        self.repository.mark_checking(site_id).await?;
        let report = self.executor.execute(&site, RetryTracker::new()).await;
        self.repository.record_result(site_id, &report.outcome, report.finished_at).await?;

        Ok(report)
    }
}
