//! Shared fakes for scheduler integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use knocker::memory::RecordedResult;
use knocker::{
    MemoryStore, Notifier, ProbeError, ProbeRequest, ProbeResponse, Prober, Scheduler,
    SchedulerOptions, ScriptSandbox, SiteId, ValidationExecutor,
};
use tokio::sync::mpsc;

/// Prober replaying a fixed list of responses, then repeating the last one
pub struct ScriptedProber {
    responses: Mutex<VecDeque<Result<ProbeResponse, String>>>,
    last: Mutex<Result<ProbeResponse, String>>,
    delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(responses: Vec<Result<ProbeResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(Ok(ProbeResponse::new(200, "ok"))),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn statuses(statuses: &[u16]) -> Self {
        Self::new(statuses.iter().map(|status| Ok(ProbeResponse::new(*status, "ok"))).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        if request.url.contains("panic") {
            panic!("prober exploded for {}", request.url);
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = {
            let mut responses = self.responses.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = responses.pop_front() {
                *last = next;
            }
            (*last).clone()
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        response.map_err(ProbeError::Transport)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(SiteId),
    Failure(SiteId, String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn success(&self, site_id: SiteId) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Notification::Success(site_id));
        Ok(())
    }

    async fn failure(&self, site_id: SiteId, reason: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Notification::Failure(site_id, reason.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub store: Arc<MemoryStore>,
    pub prober: Arc<ScriptedProber>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(prober: ScriptedProber) -> Harness {
    harness_with(prober, SchedulerOptions::default())
}

pub fn harness_with(prober: ScriptedProber, options: SchedulerOptions) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let prober = Arc::new(prober);
    let notifier = Arc::new(RecordingNotifier::default());
    let executor = Arc::new(ValidationExecutor::new(prober.clone(), ScriptSandbox::default()));
    let scheduler = Scheduler::new(executor, store.clone(), notifier.clone(), options);

    Harness { scheduler, store, prober, notifier }
}

/// Wait for the next recorded outcome (time is usually paused, so the
/// generous limit costs nothing)
pub async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<RecordedResult>) -> RecordedResult {
    tokio::time::timeout(Duration::from_secs(6 * 3600), rx.recv())
        .await
        .expect("Timeout waiting for outcome")
        .expect("Store channel closed")
}

/// Let spawned tasks (timers, jobs, notifications) run
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}
