//! File organization pipeline
//!
//! This module moves files out of watched directories into category folders:
//! - Extension classification
//! - Collision-free destination naming
//! - Same-volume rename with a cross-volume copy fallback
//! - A bounded worker pool for backlog batches
//! - Per-directory live watchers under a supervisor

pub mod classifier;
pub mod executor;
pub mod mover;
pub mod resolver;
pub mod scanner;
pub mod supervisor;
pub mod watcher;


pub use classifier::{Category, Classifier};
pub use executor::BatchExecutor;
pub use mover::{DeviceIdProbe, MoveError, Mover, VolumeProbe};
pub use scanner::{BacklogScanner, ScanReport};
pub use supervisor::{BacklogSummary, Supervisor, SupervisorReport};
pub use watcher::{
    ChangeType, EventSource, FileChange, LiveWatcher, NotifySource, Subscription, WatcherStats,
};

use crate::config::ConfigError;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that stop a scan or the organizer itself. Per-file problems are
/// [`MoveError`]s carried inside a [`MoveOutcome`] instead.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("Failed to create destination directory {}: {source}", .path.display())]
    CreateDestination { path: PathBuf, source: std::io::Error },

    #[error("Failed to enumerate {}: {source}", .path.display())]
    Enumerate { path: PathBuf, source: walkdir::Error },

    #[error("Failed to watch {}: {source}", .path.display())]
    Subscribe { path: PathBuf, source: notify::Error },

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, OrganizeError>;

/// One planned relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOperation {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl MoveOperation {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self { source: source.into(), destination: destination.into() }
    }
}

/// How a successful move was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Rename,
    CopyDelete,
}

/// Result of a single move attempt
#[derive(Debug)]
pub enum MoveOutcome {
    Moved { source: PathBuf, destination: PathBuf, method: MoveMethod },
    Failed { source: PathBuf, error: MoveError },
}

impl MoveOutcome {
    pub fn source(&self) -> &Path {
        match self {
            Self::Moved { source, .. } | Self::Failed { source, .. } => source,
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::Moved { destination, .. } => Some(destination),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }

    /// Failed only because another trigger already moved the file
    pub fn is_benign_failure(&self) -> bool {
        matches!(self, Self::Failed { error, .. } if error.is_benign())
    }
}

impl fmt::Display for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moved { source, destination, .. } => {
                write!(f, "Moved: {} → {}", display_name(source), destination.display())
            }
            Self::Failed { source, error } => {
                write!(f, "Error moving {}: {}", display_name(source), error)
            }
        }
    }
}

/// Emit one log line for an outcome
pub fn report(outcome: &MoveOutcome) {
    match outcome {
        MoveOutcome::Moved { method: MoveMethod::CopyDelete, .. } => {
            info!("{} (copied across volumes)", outcome)
        }
        MoveOutcome::Moved { .. } => info!("{}", outcome),
        MoveOutcome::Failed { source, .. } if outcome.is_benign_failure() => {
            info!("Skipped {}: already moved", display_name(source))
        }
        MoveOutcome::Failed { .. } => warn!("{}", outcome),
    }
}

/// Dot-prefixed names are hidden and never organized
pub fn is_hidden(path: &Path) -> bool {
    path.file_name().map(|name| name.to_string_lossy().starts_with('.')).unwrap_or(false)
}

fn display_name(path: &Path) -> String {
    path.file_name().unwrap_or(path.as_os_str()).to_string_lossy().into_owned()
}
