//! Startup ordering and shutdown for the whole organizer

use crate::config::OrganizerConfig;
use crate::organizer::{
    BacklogScanner, BatchExecutor, EventSource, LiveWatcher, Mover, NotifySource, OrganizeError,
    Result, ScanReport, Subscription, WatcherStats,
};
use std::fs;
use std::future::{self, Future};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Results of the backlog phase across all watched directories
#[derive(Debug, Default)]
pub struct BacklogSummary {
    pub scans: Vec<ScanReport>,
    /// Directories whose scan aborted, with the reason
    pub failures: Vec<(PathBuf, OrganizeError)>,
    /// A stop request arrived before every directory was scanned
    pub interrupted: bool,
}

impl BacklogSummary {
    pub fn moved(&self) -> usize {
        self.scans.iter().map(ScanReport::moved).sum()
    }

    pub fn failed(&self) -> usize {
        self.scans.iter().map(ScanReport::failed).sum()
    }
}

/// Everything the organizer did between startup and shutdown
#[derive(Debug, Default)]
pub struct SupervisorReport {
    pub backlog: BacklogSummary,
    pub watchers: Vec<(PathBuf, WatcherStats)>,
}

impl SupervisorReport {
    pub fn moved(&self) -> usize {
        self.backlog.moved() + self.watchers.iter().map(|(_, stats)| stats.moved).sum::<usize>()
    }
}

/// Owns the watched directories: scans every backlog, then runs one live
/// watcher per directory until told to stop.
pub struct Supervisor {
    config: Arc<OrganizerConfig>,
    mover: Mover,
    source: Box<dyn EventSource>,
    stop: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(config: OrganizerConfig) -> Self {
        Self::with_source(config, Box::new(NotifySource))
    }

    pub fn with_source(config: OrganizerConfig, source: Box<dyn EventSource>) -> Self {
        let (stop, _) = watch::channel(false);
        Self { config: Arc::new(config), mover: Mover::new(), source, stop }
    }

    pub fn with_mover(mut self, mover: Mover) -> Self {
        self.mover = mover;
        self
    }

    pub fn config(&self) -> &OrganizerConfig {
        &self.config
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Create every destination directory that does not exist yet
    pub fn prepare_destinations(&self) -> Result<()> {
        for category in self.config.categories() {
            fs::create_dir_all(&category.directory).map_err(|source| {
                OrganizeError::CreateDestination { path: category.directory.clone(), source }
            })?;
        }
        Ok(())
    }

    /// Organize the files already present in every watched directory. A
    /// directory that cannot be read is reported and skipped.
    pub async fn scan_backlog(&self) -> Result<BacklogSummary> {
        self.scan_backlog_until(future::pending()).await
    }

    /// Like [`Supervisor::scan_backlog`], but once `shutdown` resolves no new
    /// batch is started. The batch already running always completes.
    pub async fn scan_backlog_until<F>(&self, shutdown: F) -> Result<BacklogSummary>
    where
        F: Future<Output = ()>,
    {
        let config = Arc::clone(&self.config);
        let mover = self.mover.clone();
        let stop = self.stop.subscribe();

        let mut scan = tokio::task::spawn_blocking(move || -> Result<BacklogSummary> {
            let executor = BatchExecutor::new(config.workers(), mover)?;
            let scanner = BacklogScanner::new(&config, &executor).with_stop(stop);
            let mut summary = BacklogSummary::default();

            for directory in config.watched() {
                if scanner.stop_requested() {
                    summary.interrupted = true;
                    break;
                }
                match scanner.scan(directory) {
                    Ok(report) => {
                        summary.interrupted |= report.interrupted;
                        summary.scans.push(report);
                    }
                    Err(e) => {
                        error!("Error scanning directory {}: {}", directory.display(), e);
                        summary.failures.push((directory.clone(), e));
                    }
                }
            }

            Ok(summary)
        });

        let mut shutdown = pin!(shutdown);
        let mut stopping = self.stop_requested();
        loop {
            tokio::select! {
                biased;

                result = &mut scan => return result?,

                _ = shutdown.as_mut(), if !stopping => {
                    info!("Stop requested; finishing the batch in progress");
                    stopping = true;
                    self.stop.send_replace(true);
                }
            }
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// `shutdown` is watched from the start, so a stop during the backlog
    /// finishes the running batch and returns without watching. Startup
    /// failures (a destination that cannot be created, a directory that
    /// cannot be watched) are returned before any watcher runs. After
    /// shutdown, events still settling are dropped and moves already started
    /// finish before this returns.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SupervisorReport>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        self.prepare_destinations()?;

        let backlog = self.scan_backlog_until(shutdown.as_mut()).await?;
        if self.stop_requested() {
            info!("Stopped during the backlog: {} files organized", backlog.moved());
            return Ok(SupervisorReport { backlog, watchers: Vec::new() });
        }
        info!("Backlog done: {} files organized", backlog.moved());

        let subscriptions = self.subscribe_all()?;

        let watched: Vec<String> =
            subscriptions.iter().map(|s| s.directory().display().to_string()).collect();
        let mut watchers = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let directory = subscription.directory().to_path_buf();
            let stop = self.stop.subscribe();
            let watcher = LiveWatcher::new(Arc::clone(&self.config), self.mover.clone(), stop);
            watchers.push((directory, tokio::spawn(watcher.run(subscription))));
        }
        info!("Now monitoring directories: {}", watched.join(", "));

        shutdown.await;
        info!("Shutting down; waiting for in-flight moves");
        self.stop.send_replace(true);

        let mut report = SupervisorReport { backlog, watchers: Vec::with_capacity(watchers.len()) };
        for (directory, handle) in watchers {
            let stats = handle.await?;
            report.watchers.push((directory, stats));
        }

        info!("File monitoring stopped.");
        Ok(report)
    }

    /// Subscribe to every watched directory that is not itself a destination.
    /// Any failure drops the subscriptions made so far.
    fn subscribe_all(&mut self) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::with_capacity(self.config.watched().len());

        for directory in self.config.watched() {
            if self.config.is_within_destination(directory) {
                warn!("Not watching {}: it is a destination directory", directory.display());
                continue;
            }

            let subscription = self
                .source
                .subscribe(directory)
                .map_err(|source| OrganizeError::Subscribe { path: directory.clone(), source })?;
            subscriptions.push(subscription);
        }

        Ok(subscriptions)
    }
}
