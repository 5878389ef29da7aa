//! Daemon - foreground scheduler for periodic refreshes
//!
//! Queues a refresh of every tracked repository at start-up and then once per
//! configured interval, until SIGINT or SIGTERM. Writes a PID file while
//! running.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::Service;
use crate::sync::SyncEvent;

/// Cycle counters fed by the dispatcher's event stream
#[derive(Debug, Default)]
struct DaemonCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Daemon statistics and status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub uptime: Duration,
    pub completed_syncs: u64,
    pub failed_syncs: u64,
    pub skipped_syncs: u64,
    pub refresh_interval: Duration,
}

/// Daemon state and control
pub struct Daemon {
    service: Arc<Service>,
    refresh_interval: Duration,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    counters: Arc<DaemonCounters>,
    pid_file_path: Option<PathBuf>,
    started_at: Instant,
}

impl Daemon {
    pub fn new(service: Arc<Service>, config: &Config) -> Result<Self> {
        let refresh_interval = config
            .refresh_interval()
            .context("Failed to parse refresh interval")?;

        let (shutdown_sender, _) = broadcast::channel(1);

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            let expanded_path = shellexpand::full(&config.daemon.pid_file)
                .context("Failed to expand PID file path")?;
            Some(PathBuf::from(expanded_path.as_ref()))
        } else {
            None
        };

        Ok(Self {
            service,
            refresh_interval,
            shutdown_sender,
            is_running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(DaemonCounters::default()),
            pid_file_path,
            started_at: Instant::now(),
        })
    }

    /// Sender that stops [`Daemon::run`] when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Run in the foreground until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        info!("Starting repowatch daemon");

        self.write_pid_file().context("Failed to write PID file")?;
        self.is_running.store(true, Ordering::SeqCst);

        let shutdown_receiver = self.shutdown_sender.subscribe();

        let shutdown_sender = self.shutdown_sender.clone();
        let signal_task = tokio::spawn(async move {
            match Self::wait_for_shutdown_signal().await {
                Ok(()) => info!("Shutdown signal received, stopping daemon..."),
                Err(e) => error!("Failed to listen for shutdown signals: {}", e),
            }
            let _ = shutdown_sender.send(());
        });

        let events_task = tokio::spawn(Self::count_events(
            self.service.subscribe(),
            Arc::clone(&self.counters),
        ));

        let result = self.daemon_loop(shutdown_receiver).await;

        signal_task.abort();
        info!("Waiting for in-flight syncs to finish");
        self.service.shutdown().await;
        events_task.abort();

        self.cleanup().context("Failed to cleanup daemon")?;
        result
    }

    async fn daemon_loop(&self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let mut interval_timer = interval(self.refresh_interval);

        info!("Daemon loop started with interval: {:?}", self.refresh_interval);

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                // First tick fires immediately
                _ = interval_timer.tick() => {
                    debug!("Starting scheduled refresh");
                    match self.service.refresh_all() {
                        Ok(queued) => debug!("Scheduled refresh queued {} repositories", queued),
                        Err(e) => error!("Scheduled refresh failed: {}", e),
                    }
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    async fn count_events(
        mut events: broadcast::Receiver<SyncEvent>,
        counters: Arc<DaemonCounters>,
    ) {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Completed(_)) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(SyncEvent::Failed { full_name, error }) => {
                    warn!("Scheduled sync failed for {}: {}", full_name, error);
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(SyncEvent::Skipped { .. }) => {
                    counters.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Daemon missed {} sync events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            uptime: self.started_at.elapsed(),
            completed_syncs: self.counters.completed.load(Ordering::Relaxed),
            failed_syncs: self.counters.failed.load(Ordering::Relaxed),
            skipped_syncs: self.counters.skipped.load(Ordering::Relaxed),
            refresh_interval: self.refresh_interval,
        }
    }

    /// Wait for SIGINT or SIGTERM
    #[cfg(unix)]
    async fn wait_for_shutdown_signal() -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => debug!("SIGTERM received"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown_signal() -> std::io::Result<()> {
        tokio::signal::ctrl_c().await
    }

    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }
}

/// PID recorded by a running daemon, if its PID file exists
pub fn read_pid_file(config: &Config) -> Result<Option<u32>> {
    if config.daemon.pid_file.is_empty() {
        return Ok(None);
    }

    let expanded_path =
        shellexpand::full(&config.daemon.pid_file).context("Failed to expand PID file path")?;
    let pid_file = PathBuf::from(expanded_path.as_ref());

    if !pid_file.exists() {
        return Ok(None);
    }

    let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;
    let pid = pid_str.trim().parse().context("Invalid PID in PID file")?;
    Ok(Some(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockSource, RemoteRepository};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use tempfile::tempdir;

    fn quiet_source() -> MockSource {
        let mut source = MockSource::new();
        source.expect_get_repository().returning(|owner, name| {
            Ok(RemoteRepository {
                name: name.to_string(),
                owner: owner.to_string(),
                full_name: format!("{}/{}", owner, name),
                description: String::new(),
                url: String::new(),
                html_url: String::new(),
                private: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        });
        source.expect_list_pull_requests().returning(|_, _, _| Ok(vec![]));
        source.expect_list_issues().returning(|_, _, _| Ok(vec![]));
        source
    }

    #[test]
    fn test_read_pid_file() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("repowatch.pid");

        let mut config = Config::default();
        config.daemon.pid_file = pid_file.to_string_lossy().to_string();
        assert_eq!(read_pid_file(&config).unwrap(), None);

        fs::write(&pid_file, "4242\n").unwrap();
        assert_eq!(read_pid_file(&config).unwrap(), Some(4242));

        fs::write(&pid_file, "not-a-pid").unwrap();
        assert!(read_pid_file(&config).is_err());
    }

    #[tokio::test]
    async fn test_daemon_rejects_bad_interval() {
        let mut config = Config::default();
        config.sync.refresh_interval = "soon".to_string();
        let service = Arc::new(Service::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockSource::new()),
            &config,
        ));

        assert!(Daemon::new(service, &config).is_err());
    }

    #[tokio::test]
    async fn test_daemon_refreshes_and_cleans_up() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("run").join("repowatch.pid");

        let mut config = Config::default();
        config.daemon.pid_file = pid_file.to_string_lossy().to_string();
        config.sync.refresh_interval = "1h".to_string();

        let service = Arc::new(Service::new(
            Arc::new(MemoryStore::new()),
            Arc::new(quiet_source()),
            &config,
        ));
        service.track("acme/widgets").await.unwrap();

        let daemon = Arc::new(Daemon::new(Arc::clone(&service), &config).unwrap());
        let shutdown = daemon.shutdown_handle();

        let runner = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run().await })
        };

        // Wait for the start-up refresh to land
        let mut synced = false;
        for _ in 0..100 {
            if pid_file.exists()
                && service
                    .get_repository("acme/widgets")
                    .unwrap()
                    .last_synced_at
                    .is_some()
            {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(synced);
        assert!(daemon.status().is_running);

        shutdown.send(()).unwrap();
        runner.await.unwrap().unwrap();

        assert!(!pid_file.exists());
        assert!(!daemon.status().is_running);
    }
}
