//! Per-site validation timers.
//!
//! Every scheduled site owns one slot in an arena keyed by [`SiteId`]. The
//! arena map is only locked long enough to look a slot up; all schedule,
//! cancel, fire, completion and reconcile steps for a site run under that
//! site's own lock, so different sites never wait on each other.
//!
//! Each installed entry gets a fresh generation number. Timers and jobs
//! capture the generation they were started for, and whatever they produce
//! is dropped once the entry has been replaced or cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::executor::{JobReport, ValidationExecutor};
use crate::retry::RetryTracker;
use crate::sink::{Notifier, SiteStore};
use crate::site::{LastResult, Site, SiteId};
use crate::types::{SiteStatus, ValidationOutcome};

/// Scheduler-wide settings
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Upper bound on validation jobs running at the same time, across sites
    pub max_concurrent_checks: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self { max_concurrent_checks: 32 }
    }
}

/// Read-only view of a site's schedule entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub site_id: SiteId,
    pub next_fire_at: DateTime<Utc>,
    pub in_flight: bool,
    pub consecutive_failures: u32,
    pub generation: u64,
}

/// What a reconciliation pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub cancelled: usize,
    pub unchanged: usize,
}

type SlotHandle = Arc<Mutex<SiteSlot>>;

#[derive(Default)]
struct SiteSlot {
    entry: Option<ScheduleEntry>,
    /// Generation of the job currently running for this site. Survives
    /// entry replacement so a superseded job still blocks a new one.
    in_flight: Option<u64>,
}

struct ScheduleEntry {
    site: Site,
    generation: u64,
    next_fire_at: DateTime<Utc>,
    tracker: RetryTracker,
    /// Status of the last `Success`/`Failed`, for success-after-failure
    /// notifications
    last_terminal: Option<SiteStatus>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every arm; a timer only fires if it is still the latest.
    arm_seq: u64,
    /// A tick arrived while a superseded job was still running
    fire_when_idle: bool,
}

impl ScheduleEntry {
    fn new(site: Site, generation: u64, last_terminal: Option<SiteStatus>) -> Self {
        Self {
            site,
            generation,
            next_fire_at: Utc::now(),
            tracker: RetryTracker::new(),
            last_terminal,
            timer: None,
            arm_seq: 0,
            fire_when_idle: false,
        }
    }

    fn snapshot(&self, in_flight: bool) -> EntrySnapshot {
        EntrySnapshot {
            site_id: self.site.id,
            next_fire_at: self.next_fire_at,
            in_flight,
            consecutive_failures: self.tracker.consecutive_failures(),
            generation: self.generation,
        }
    }

    /// Replace the pending timer with one firing at `at`
    fn arm(&mut self, inner: &Arc<Inner>, at: DateTime<Utc>) {
        self.arm_seq += 1;
        self.next_fire_at = at;

        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let timer = tokio::spawn(Inner::on_timer(
            Arc::clone(inner),
            self.site.id,
            self.generation,
            self.arm_seq,
            delay,
        ));

        if let Some(previous) = self.timer.replace(timer) {
            previous.abort();
        }
    }
}

impl Drop for ScheduleEntry {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Last terminal status recorded for a site, if any
fn last_terminal_status(site: &Site) -> Option<SiteStatus> {
    site.last_result.as_ref().and_then(|last| last.terminal_status)
}

/// When a site without a schedule entry should next be checked.
///
/// A pending retry is due at its retry time; otherwise one interval after
/// the last recorded result. Never earlier than `now`, and sites that were
/// never checked are due immediately.
pub fn reconcile_fire_at(site: &Site, now: DateTime<Utc>) -> DateTime<Utc> {
    match &site.last_result {
        Some(LastResult { pending_retry: Some(retry), .. }) => retry.at.max(now),
        Some(last) => (last.timestamp + site.check_interval()).max(now),
        None => now,
    }
}

/// Retry state to resume a restored site with
fn restored_tracker(site: &Site) -> RetryTracker {
    site.last_result
        .as_ref()
        .and_then(|last| last.pending_retry)
        .map_or_else(RetryTracker::new, |retry| RetryTracker::with_failures(retry.attempt))
}

struct Inner {
    executor: Arc<ValidationExecutor>,
    store: Arc<dyn SiteStore>,
    notifier: Arc<dyn Notifier>,
    slots: StdMutex<HashMap<SiteId, SlotHandle>>,
    permits: Arc<Semaphore>,
    generations: AtomicU64,
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn slot(&self, site_id: SiteId) -> Option<SlotHandle> {
        self.slots.lock().ok()?.get(&site_id).cloned()
    }

    fn slot_or_insert(&self, site_id: SiteId) -> SlotHandle {
        match self.slots.lock() {
            Ok(mut slots) => Arc::clone(slots.entry(site_id).or_default()),
            // A poisoned map still holds valid slots; recover it.
            Err(poisoned) => Arc::clone(poisoned.into_inner().entry(site_id).or_default()),
        }
    }

    fn slot_ids(&self) -> Vec<SiteId> {
        self.slots.lock().map(|slots| slots.keys().copied().collect()).unwrap_or_default()
    }

    /// Forget slots with no entry, no running job and no other holder.
    ///
    /// Handles are only cloned under the map lock, so a strong count of one
    /// means nobody can be about to use the slot.
    fn prune(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.retain(|_, slot| {
                Arc::strong_count(slot) > 1
                    || slot
                        .try_lock()
                        .map(|slot| slot.entry.is_some() || slot.in_flight.is_some())
                        .unwrap_or(true)
            });
        }
    }

    async fn on_timer(
        self: Arc<Self>,
        site_id: SiteId,
        generation: u64,
        arm_seq: u64,
        delay: Duration,
    ) {
        tokio::time::sleep(delay).await;

        let Some(slot) = self.slot(site_id) else { return };
        let mut guard = slot.lock().await;
        let SiteSlot { entry, in_flight } = &mut *guard;

        let Some(entry) = entry
            .as_mut()
            .filter(|entry| entry.generation == generation && entry.arm_seq == arm_seq)
        else {
            return;
        };
        // Detach rather than abort: this task is the timer being taken.
        drop(entry.timer.take());

        if let Some(running) = *in_flight {
            if running == generation {
                debug!(%site_id, "validation still in flight, skipping tick");
                let next = Utc::now() + entry.site.check_interval();
                entry.arm(&self, next);
            } else {
                debug!(%site_id, "superseded validation still in flight, deferring tick");
                entry.fire_when_idle = true;
            }
            return;
        }

        *in_flight = Some(generation);
        let site = entry.site.clone();
        let tracker = entry.tracker;
        drop(guard);

        self.dispatch(site, generation, tracker);
    }

    /// Launch one validation job. Failures inside the job task are caught
    /// here so they can only affect this site.
    fn dispatch(self: &Arc<Self>, site: Site, generation: u64, tracker: RetryTracker) {
        let inner = Arc::clone(self);
        let site_id = site.id;

        tokio::spawn(async move {
            let job_inner = Arc::clone(&inner);
            let job = tokio::spawn(async move {
                let _permit = Arc::clone(&job_inner.permits).acquire_owned().await.ok();
                if let Err(e) = job_inner.store.mark_checking(site.id).await {
                    warn!(site_id = %site.id, error = %e, "failed to mark site as checking");
                }
                job_inner.executor.execute(&site, tracker).await
            });

            let result = match job.await {
                Ok(report) => inner.complete(site_id, generation, report).await,
                Err(join_error) => Err(SchedulerError::Internal {
                    site_id,
                    message: format!("validation job aborted: {join_error}"),
                }),
            };

            if let Err(error) = result {
                error!(%site_id, %error, "site unscheduled until next reconciliation");
                inner.abandon(site_id, generation).await;
            }
        });
    }

    async fn complete(
        self: &Arc<Self>,
        site_id: SiteId,
        generation: u64,
        report: JobReport,
    ) -> Result<(), SchedulerError> {
        let Some(slot) = self.slot(site_id) else {
            return Err(SchedulerError::Internal {
                site_id,
                message: "slot vanished while a job was in flight".to_string(),
            });
        };
        let mut guard = slot.lock().await;
        let SiteSlot { entry, in_flight } = &mut *guard;

        if *in_flight != Some(generation) {
            return Err(SchedulerError::Internal {
                site_id,
                message: format!(
                    "job for generation {generation} finished while in-flight marker is {:?}",
                    in_flight
                ),
            });
        }
        *in_flight = None;

        let Some(entry) = entry.as_mut() else {
            debug!(%site_id, "site was cancelled, discarding outcome");
            return Ok(());
        };

        if entry.generation != generation {
            debug!(%site_id, "discarding outcome of superseded schedule");
            if std::mem::take(&mut entry.fire_when_idle) {
                entry.arm(self, Utc::now());
            }
            return Ok(());
        }

        entry.tracker = report.tracker;
        let next_fire_at = match &report.outcome {
            ValidationOutcome::RetryScheduled { next_attempt_at, .. } => *next_attempt_at,
            _ => report.finished_at + entry.site.check_interval(),
        };

        self.emit(entry, &report).await;
        entry.arm(self, next_fire_at);
        Ok(())
    }

    /// Hand an outcome to the store and, for terminal transitions, the
    /// notifier. Runs under the site lock so a site's outcomes reach the
    /// store in completion order.
    async fn emit(&self, entry: &mut ScheduleEntry, report: &JobReport) {
        let site_id = entry.site.id;

        if let Err(e) = self.store.record_result(site_id, &report.outcome, report.finished_at).await
        {
            error!(%site_id, error = %e, "failed to record validation result");
        }

        match &report.outcome {
            ValidationOutcome::Success => {
                info!(%site_id, latency_ms = report.latency_ms, "site is up");
                if entry.last_terminal == Some(SiteStatus::Error) {
                    let notifier = Arc::clone(&self.notifier);
                    tokio::spawn(async move {
                        if let Err(e) = notifier.success(site_id).await {
                            warn!(%site_id, error = %e, "success notification failed");
                        }
                    });
                }
                entry.last_terminal = Some(SiteStatus::Ok);
            }
            ValidationOutcome::RetryScheduled { attempt, next_attempt_at, reason } => {
                info!(%site_id, attempt, %next_attempt_at, %reason, "validation failed, retry scheduled");
            }
            ValidationOutcome::Failed { reason } => {
                warn!(%site_id, %reason, "site is down");
                let notifier = Arc::clone(&self.notifier);
                let reason = reason.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.failure(site_id, &reason).await {
                        warn!(%site_id, error = %e, "failure notification failed");
                    }
                });
                entry.last_terminal = Some(SiteStatus::Error);
            }
        }
    }

    /// Recover from an internal error: release the in-flight marker and drop
    /// the entry the failed job belonged to.
    async fn abandon(self: &Arc<Self>, site_id: SiteId, generation: u64) {
        let Some(slot) = self.slot(site_id) else { return };
        let mut guard = slot.lock().await;
        let SiteSlot { entry, in_flight } = &mut *guard;

        if *in_flight == Some(generation) {
            *in_flight = None;
        }

        if entry.as_ref().is_some_and(|current| current.generation == generation) {
            *entry = None;
        } else if let Some(current) = entry.as_mut() {
            if std::mem::take(&mut current.fire_when_idle) {
                current.arm(self, Utc::now());
            }
        }
    }

    async fn cancel(&self, site_id: SiteId) -> bool {
        let Some(slot) = self.slot(site_id) else { return false };
        let removed = slot.lock().await.entry.take();
        if removed.is_some() {
            info!(%site_id, "validation schedule cancelled");
        }
        removed.is_some()
    }
}

/// Owns the validation schedule of every site.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        executor: Arc<ValidationExecutor>,
        store: Arc<dyn SiteStore>,
        notifier: Arc<dyn Notifier>,
        options: SchedulerOptions,
    ) -> Self {
        let permits = options.max_concurrent_checks.max(1);
        Self {
            inner: Arc::new(Inner {
                executor,
                store,
                notifier,
                slots: StdMutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(permits)),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule validation of `site`.
    ///
    /// With `cancel_previous`, any existing entry is replaced by a fresh one
    /// (retry state reset, running job's outcome discarded). Otherwise an
    /// existing entry keeps its state and takes the new configuration, and is
    /// only re-armed when `right_now` is set. Disabled sites are unscheduled.
    pub async fn schedule_validation(&self, site: &Site, right_now: bool, cancel_previous: bool) {
        if site.disabled {
            debug!(site_id = %site.id, "site is disabled, not scheduling");
            self.inner.cancel(site.id).await;
            return;
        }

        let slot = self.inner.slot_or_insert(site.id);
        let mut guard = slot.lock().await;
        let now = Utc::now();

        if let Some(entry) = guard.entry.as_mut().filter(|_| !cancel_previous) {
            entry.site = site.clone();
            if right_now {
                entry.arm(&self.inner, now);
            }
            debug!(site_id = %site.id, right_now, "validation schedule refreshed");
            return;
        }

        let last_terminal = match &guard.entry {
            Some(previous) => previous.last_terminal,
            None => last_terminal_status(site),
        };
        let fire_at = if right_now { now } else { now + site.check_interval() };

        let mut entry = ScheduleEntry::new(site.clone(), self.inner.next_generation(), last_terminal);
        entry.arm(&self.inner, fire_at);
        // Dropping the replaced entry aborts its timer.
        guard.entry = Some(entry);

        info!(
            site_id = %site.id,
            url = %site.url,
            mode = %site.validation_mode,
            next_fire_at = %fire_at,
            "validation scheduled"
        );
    }

    /// Remove the site's entry and stop its timer; no-op when absent
    pub async fn cancel_scheduled_validation(&self, site: &Site) {
        self.cancel_site(site.id).await;
    }

    /// Same as [`Scheduler::cancel_scheduled_validation`] by id
    pub async fn cancel_site(&self, site_id: SiteId) -> bool {
        let cancelled = self.inner.cancel(site_id).await;
        self.inner.prune();
        cancelled
    }

    /// Bring the schedule in line with the store.
    ///
    /// Active sites without an entry are scheduled one interval after their
    /// last result, or at their pending retry (clamped to now); entries for
    /// sites that are gone or disabled are cancelled. Existing entries keep
    /// their timers.
    pub async fn ensure_scheduled_validations(&self) -> Result<ReconcileReport, SchedulerError> {
        let sites = self.inner.store.list_active_sites().await?;
        let now = Utc::now();

        let active: HashMap<SiteId, Site> = sites
            .into_iter()
            .filter(|site| !site.disabled)
            .map(|site| (site.id, site))
            .collect();
        let stale: Vec<SiteId> =
            self.inner.slot_ids().into_iter().filter(|id| !active.contains_key(id)).collect();

        let installed = join_all(active.values().map(|site| self.reconcile_site(site, now))).await;
        let cancelled = join_all(stale.iter().map(|id| self.inner.cancel(*id))).await;
        self.inner.prune();

        let scheduled = installed.iter().filter(|installed| **installed).count();
        let report = ReconcileReport {
            scheduled,
            cancelled: cancelled.iter().filter(|cancelled| **cancelled).count(),
            unchanged: installed.len() - scheduled,
        };

        info!(
            scheduled = report.scheduled,
            cancelled = report.cancelled,
            unchanged = report.unchanged,
            "validation schedules reconciled"
        );
        Ok(report)
    }

    async fn reconcile_site(&self, site: &Site, now: DateTime<Utc>) -> bool {
        let slot = self.inner.slot_or_insert(site.id);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.entry.as_mut() {
            if entry.site != *site {
                entry.site = site.clone();
            }
            return false;
        }

        let fire_at = reconcile_fire_at(site, now);
        let generation = self.inner.next_generation();
        let mut entry = ScheduleEntry::new(site.clone(), generation, last_terminal_status(site));
        entry.tracker = restored_tracker(site);
        entry.arm(&self.inner, fire_at);
        guard.entry = Some(entry);

        debug!(site_id = %site.id, next_fire_at = %fire_at, "validation schedule restored");
        true
    }

    /// Snapshot of the site's entry, if scheduled
    pub async fn entry(&self, site_id: SiteId) -> Option<EntrySnapshot> {
        let slot = self.inner.slot(site_id)?;
        let guard = slot.lock().await;
        let in_flight = guard.in_flight.is_some();
        guard.entry.as_ref().map(|entry| entry.snapshot(in_flight))
    }

    /// Ids of every site with an active entry
    pub async fn scheduled_sites(&self) -> Vec<SiteId> {
        let mut ids = Vec::new();
        for site_id in self.inner.slot_ids() {
            if self.entry(site_id).await.is_some() {
                ids.push(site_id);
            }
        }
        ids.sort();
        ids
    }

    /// Cancel every entry. Jobs already running finish and are discarded.
    pub async fn shutdown(&self) {
        let ids = self.inner.slot_ids();
        let cancelled = join_all(ids.iter().map(|id| self.inner.cancel(*id))).await;
        self.inner.prune();
        info!(cancelled = cancelled.iter().filter(|c| **c).count(), "scheduler stopped");
    }
}
