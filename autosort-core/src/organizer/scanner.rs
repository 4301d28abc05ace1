//! One-shot organization of files already sitting in a watched directory

use crate::config::OrganizerConfig;
use crate::organizer::resolver::plan_move;
use crate::organizer::{
    BatchExecutor, MoveOperation, MoveOutcome, OrganizeError, Result, is_hidden,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info};
use walkdir::WalkDir;

/// What a backlog scan of one directory did
#[derive(Debug, Default)]
pub struct ScanReport {
    pub directory: PathBuf,
    /// The directory is a destination and was not scanned
    pub skipped: bool,
    /// Regular, non-hidden files seen
    pub examined: usize,
    /// Files with no category, left in place
    pub unmanaged: usize,
    /// Size of each batch handed to the executor
    pub batches: Vec<usize>,
    pub outcomes: Vec<MoveOutcome>,
    /// A stop request cut the scan short; unscanned files stay where they are
    pub interrupted: bool,
}

impl ScanReport {
    fn new(directory: &Path) -> Self {
        Self { directory: directory.to_path_buf(), ..Self::default() }
    }

    pub fn moved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_moved()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_moved()).count()
    }
}

/// Scans watched directories non-recursively and feeds batches to the executor
pub struct BacklogScanner<'a> {
    config: &'a OrganizerConfig,
    executor: &'a BatchExecutor,
    stop: Option<watch::Receiver<bool>>,
}

impl<'a> BacklogScanner<'a> {
    pub fn new(config: &'a OrganizerConfig, executor: &'a BatchExecutor) -> Self {
        Self { config, executor, stop: None }
    }

    /// Check `stop` between batches and hand out no more work once it is set
    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| *stop.borrow())
    }

    /// Organize the files directly inside `directory`.
    ///
    /// Moves start as soon as a batch fills up rather than after the whole
    /// directory has been listed. An enumeration error aborts this directory;
    /// batches already flushed stay moved. A stop request lets the batch in
    /// flight finish and leaves everything else in place.
    pub fn scan(&self, directory: &Path) -> Result<ScanReport> {
        let mut report = ScanReport::new(directory);

        if self.config.is_within_destination(directory) {
            info!("Skipping {}: it is a destination directory", directory.display());
            report.skipped = true;
            return Ok(report);
        }

        info!("Scanning existing files in {}...", directory.display());

        let batch_size = self.config.batch_size();
        let mut reserved: HashSet<PathBuf> = HashSet::new();
        let mut pending: Vec<MoveOperation> = Vec::with_capacity(batch_size);

        for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
            if self.stop_requested() {
                report.interrupted = true;
                break;
            }

            let entry = entry.map_err(|source| OrganizeError::Enumerate {
                path: directory.to_path_buf(),
                source,
            })?;

            // Symlinks are not followed, so only real files pass
            if !entry.file_type().is_file() || is_hidden(entry.path()) {
                continue;
            }
            report.examined += 1;

            let Some(operation) =
                plan_move(self.config.classifier(), entry.path(), |p| reserved.contains(p))
            else {
                debug!("Leaving unmanaged file in place: {}", entry.path().display());
                report.unmanaged += 1;
                continue;
            };

            reserved.insert(operation.destination.clone());
            pending.push(operation);

            if pending.len() >= batch_size {
                if self.stop_requested() {
                    report.interrupted = true;
                    break;
                }
                self.flush(&mut pending, &mut report);
            }
        }

        if !pending.is_empty() && !report.interrupted {
            if self.stop_requested() {
                report.interrupted = true;
            } else {
                self.flush(&mut pending, &mut report);
            }
        }

        if report.interrupted {
            info!(
                "Stopped scanning {}: {} moved, the rest left in place",
                directory.display(),
                report.moved()
            );
        } else if report.examined == 0 {
            info!("No existing files to organize in {}.", directory.display());
        } else {
            info!(
                "Finished {}: {} moved, {} failed, {} left in place",
                directory.display(),
                report.moved(),
                report.failed(),
                report.unmanaged
            );
        }

        Ok(report)
    }

    fn flush(&self, pending: &mut Vec<MoveOperation>, report: &mut ScanReport) {
        let batch = std::mem::take(pending);
        report.batches.push(batch.len());
        report.outcomes.extend(self.executor.execute(&batch));
    }
}
