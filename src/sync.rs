//! Sync Engine - fetch-and-merge cycles and their background dispatch
//!
//! [`Synchronizer`] runs one cycle for one repository: pull requests first,
//! then issues, then `last_synced_at`. [`SyncDispatcher`] queues cycles and
//! runs them on detached tokio tasks, bounded by a semaphore.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{split_full_name, Entity, Error, Result};
use crate::models::{Issue, PullRequest};
use crate::source::{ListOptions, RemoteLabel, Source};
use crate::store::Store;
use crate::tracker::SyncTracker;

/// Per-kind reconciliation counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    /// Entries ignored, e.g. pull requests in the issue feed
    pub skipped: usize,
}

/// Results from one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub full_name: String,
    pub pull_requests: ItemCounts,
    pub issues: ItemCounts,
    pub labels_created: usize,
    pub label_failures: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }
}

/// How a requested cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed(String),
    /// Another cycle for the same repository was already running
    Skipped,
}

enum Upsert {
    Inserted,
    Updated,
}

impl ItemCounts {
    fn record(&mut self, result: &Result<Upsert>) {
        match result {
            Ok(Upsert::Inserted) => self.inserted += 1,
            Ok(Upsert::Updated) => self.updated += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Runs fetch-and-merge cycles against a [`Store`]
#[derive(Clone)]
pub struct Synchronizer {
    store: Arc<dyn Store>,
    source: Arc<dyn Source>,
    tracker: Arc<SyncTracker>,
    items_per_fetch: u8,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn Source>,
        tracker: Arc<SyncTracker>,
        items_per_fetch: u8,
    ) -> Self {
        Self {
            store,
            source,
            tracker,
            items_per_fetch: items_per_fetch.max(1),
        }
    }

    pub fn tracker(&self) -> &Arc<SyncTracker> {
        &self.tracker
    }

    /// Run one cycle for `full_name`.
    ///
    /// Failures are recorded in the tracker and returned as
    /// [`SyncOutcome::Failed`]; they never propagate as errors.
    pub async fn run_cycle(&self, full_name: &str) -> SyncOutcome {
        if !self.tracker.try_begin(full_name) {
            debug!("Sync already in progress for {}, skipping", full_name);
            return SyncOutcome::Skipped;
        }

        info!("Starting sync for {}", full_name);
        match self.cycle(full_name).await {
            Ok(report) => {
                self.tracker.clear_status(full_name);
                info!(
                    "Sync completed for {} in {:.2}s: {} PRs ({} new), {} issues ({} new), {} failed",
                    full_name,
                    report.duration.as_secs_f64(),
                    report.pull_requests.inserted + report.pull_requests.updated,
                    report.pull_requests.inserted,
                    report.issues.inserted + report.issues.updated,
                    report.issues.inserted,
                    report.pull_requests.failed + report.issues.failed
                );
                SyncOutcome::Completed(report)
            }
            Err(
                e @ Error::NotFound {
                    entity: Entity::Repository,
                    ..
                },
            ) => {
                // Untracked mid-cycle; an error entry would outlive the repository
                warn!("Sync abandoned for {}: {}", full_name, e);
                self.tracker.clear_status(full_name);
                SyncOutcome::Failed(e.to_string())
            }
            Err(e) => {
                let detail = e.to_string();
                error!("Sync failed for {}: {}", full_name, detail);
                self.tracker.mark_error(full_name, detail.clone());
                SyncOutcome::Failed(detail)
            }
        }
    }

    async fn cycle(&self, full_name: &str) -> Result<SyncReport> {
        let start_time = Instant::now();
        let (owner, name) = split_full_name(full_name)?;
        let options = ListOptions::recent(self.items_per_fetch);

        let mut report = SyncReport {
            full_name: full_name.to_string(),
            ..SyncReport::default()
        };

        let pulls = self.source.list_pull_requests(owner, name, &options).await?;
        debug!("Reconciling {} pull requests for {}", pulls.len(), full_name);
        for remote in &pulls {
            let result = self.upsert_pull_request(remote.to_pull_request(full_name));
            if let Err(e) = &result {
                warn!("Failed to store pull request {}#{}: {}", full_name, remote.number, e);
            }
            report.pull_requests.record(&result);
            if result.is_ok() {
                for label in &remote.labels {
                    self.apply_label(&mut report, label, |store, label| {
                        store.add_pull_request_label(full_name, remote.number, label)
                    });
                }
            }
        }

        let issues = self.source.list_issues(owner, name, &options).await?;
        debug!("Reconciling {} issues for {}", issues.len(), full_name);
        for remote in &issues {
            if remote.is_pull_request {
                report.issues.skipped += 1;
                continue;
            }
            let result = self.upsert_issue(remote.to_issue(full_name));
            if let Err(e) = &result {
                warn!("Failed to store issue {}#{}: {}", full_name, remote.number, e);
            }
            report.issues.record(&result);
            if result.is_ok() {
                for label in &remote.labels {
                    self.apply_label(&mut report, label, |store, label| {
                        store.add_issue_label(full_name, remote.number, label)
                    });
                }
            }
        }

        let mut repo = self.store.get_repository(owner, name)?;
        repo.last_synced_at = Some(Utc::now());
        self.store.update_repository(repo)?;

        report.duration = start_time.elapsed();
        Ok(report)
    }

    fn upsert_pull_request(&self, pr: PullRequest) -> Result<Upsert> {
        match self.store.get_pull_request(&pr.repository_full_name, pr.number) {
            Ok(_) => self.store.update_pull_request(pr).map(|_| Upsert::Updated),
            Err(e) if e.is_not_found() => self.store.add_pull_request(pr).map(|_| Upsert::Inserted),
            Err(e) => Err(e),
        }
    }

    fn upsert_issue(&self, issue: Issue) -> Result<Upsert> {
        match self.store.get_issue(&issue.repository_full_name, issue.number) {
            Ok(_) => self.store.update_issue(issue).map(|_| Upsert::Updated),
            Err(e) if e.is_not_found() => self.store.add_issue(issue).map(|_| Upsert::Inserted),
            Err(e) => Err(e),
        }
    }

    /// Create the label if unseen, then attach it with `attach`
    fn apply_label(
        &self,
        report: &mut SyncReport,
        label: &RemoteLabel,
        attach: impl FnOnce(&dyn Store, &str) -> Result<()>,
    ) {
        let result = self
            .ensure_label(label)
            .and_then(|created| {
                if created {
                    report.labels_created += 1;
                }
                attach(self.store.as_ref(), &label.name)
            });

        if let Err(e) = result {
            warn!("Failed to attach label '{}': {}", label.name, e);
            report.label_failures += 1;
        }
    }

    /// Returns `true` when the label had to be created
    fn ensure_label(&self, label: &RemoteLabel) -> Result<bool> {
        match self.store.get_label(&label.name) {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => match self.store.add_label(label.to_label()) {
                Ok(()) => Ok(true),
                // Another cycle created it first
                Err(Error::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

/// A unit of background work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub full_name: String,
}

/// Published once per finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Completed(SyncReport),
    Failed { full_name: String, error: String },
    Skipped { full_name: String },
}

impl SyncEvent {
    pub fn full_name(&self) -> &str {
        match self {
            SyncEvent::Completed(report) => &report.full_name,
            SyncEvent::Failed { full_name, .. } | SyncEvent::Skipped { full_name } => full_name,
        }
    }
}

const EVENT_CAPACITY: usize = 256;

/// Queue of sync jobs drained by a background worker
///
/// `enqueue` returns immediately. Each job runs on its own task, detached
/// from whoever enqueued it, with at most `max_parallel` cycles at once.
pub struct SyncDispatcher {
    queue: Mutex<Option<mpsc::UnboundedSender<SyncJob>>>,
    events: broadcast::Sender<SyncEvent>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncDispatcher {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(synchronizer: Arc<Synchronizer>, max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = tokio::spawn(Self::run_worker(
            synchronizer,
            rx,
            events.clone(),
            max_parallel,
        ));

        info!("Sync dispatcher started with max_parallel={}", max_parallel);
        Self {
            queue: Mutex::new(Some(tx)),
            events,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    async fn run_worker(
        synchronizer: Arc<Synchronizer>,
        mut rx: mpsc::UnboundedReceiver<SyncJob>,
        events: broadcast::Sender<SyncEvent>,
        max_parallel: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(max_parallel));

        while let Some(job) = rx.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let synchronizer = Arc::clone(&synchronizer);
            let events = events.clone();

            tokio::spawn(async move {
                let event = match synchronizer.run_cycle(&job.full_name).await {
                    SyncOutcome::Completed(report) => SyncEvent::Completed(report),
                    SyncOutcome::Failed(error) => SyncEvent::Failed {
                        full_name: job.full_name,
                        error,
                    },
                    SyncOutcome::Skipped => SyncEvent::Skipped {
                        full_name: job.full_name,
                    },
                };
                // No subscribers is fine
                let _ = events.send(event);
                drop(permit);
            });
        }

        // Wait for in-flight jobs by reclaiming every permit
        let _ = semaphore.acquire_many(max_parallel as u32).await;
        debug!("Sync dispatcher drained");
    }

    /// Queue a cycle for `full_name`. Returns `false` after shutdown.
    pub fn enqueue(&self, full_name: impl Into<String>) -> bool {
        let job = SyncJob {
            full_name: full_name.into(),
        };
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        match queue.as_ref() {
            Some(tx) => {
                debug!("Queued sync for {}", job.full_name);
                tx.send(job).is_ok()
            }
            None => {
                warn!("Sync dispatcher is shut down, dropping job for {}", job.full_name);
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop accepting jobs, then wait for queued and running jobs to finish
    pub async fn shutdown(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                error!("Sync dispatcher worker panicked: {}", e);
            }
        }
        info!("Sync dispatcher stopped");
    }
}

/// Events already buffered on `events`, without waiting for more
///
/// A lagging receiver skips what it missed and keeps reading.
pub fn drain_events(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!("Sync event receiver lagged, {} events missed", missed);
            }
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => return drained,
        }
    }
}
