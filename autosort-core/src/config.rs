//! Organizer configuration
//!
//! [`OrganizerSettings`] is the on-disk (TOML) form. [`OrganizerSettings::resolve`]
//! validates it and produces the immutable [`OrganizerConfig`] that every pipeline
//! component receives explicitly.

use crate::organizer::classifier::{Category, Classifier};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Default size of the backlog worker pool
pub const DEFAULT_WORKERS: usize = 4;
/// Default number of pending moves that triggers a backlog flush
pub const DEFAULT_BATCH_SIZE: usize = 64;
/// Default settling delay before acting on a live event
pub const DEFAULT_SETTLE_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine the home directory; set `root` explicitly")]
    NoHomeDirectory,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Extension {extension} is mapped to both `{first}` and `{second}`")]
    DuplicateExtension { extension: String, first: String, second: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How long to wait before acting on a file reported by the live watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SettleStrategy {
    /// Sleep for a fixed delay
    Fixed { delay_ms: u64 },
    /// Poll the file size until `checks` consecutive samples agree, giving up
    /// after `timeout_ms`
    StableSize { interval_ms: u64, checks: u32, timeout_ms: u64 },
}

impl Default for SettleStrategy {
    fn default() -> Self {
        Self::Fixed { delay_ms: DEFAULT_SETTLE_MS }
    }
}

/// One destination category as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySettings {
    pub name: String,
    /// Destination directory, relative to `root` unless absolute
    pub directory: PathBuf,
    /// Extensions with or without the leading dot, any case
    pub extensions: Vec<String>,
}

impl CategorySettings {
    fn new(name: &str, directory: &str, extensions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            directory: PathBuf::from(directory),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// File form of the organizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerSettings {
    /// Base directory for relative paths; defaults to the user's home
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Directories to organize, relative to `root` unless absolute
    pub watch: Vec<PathBuf>,
    pub workers: usize,
    pub batch_size: usize,
    pub settle: SettleStrategy,
    pub categories: Vec<CategorySettings>,
}

impl Default for OrganizerSettings {
    fn default() -> Self {
        Self {
            root: None,
            watch: vec![PathBuf::from("."), PathBuf::from("Downloads")],
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            settle: SettleStrategy::default(),
            categories: vec![
                CategorySettings::new(
                    "music",
                    "Music",
                    &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a"],
                ),
                CategorySettings::new(
                    "pictures",
                    "Pictures",
                    &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp"],
                ),
                CategorySettings::new(
                    "study_materials",
                    "study_materials",
                    &[
                        ".pdf", ".djvu", ".epub", ".doc", ".docx", ".ppt", ".pptx", ".xls",
                        ".xlsx", ".txt",
                    ],
                ),
                CategorySettings::new(
                    "videos",
                    "Videos",
                    &[".mp4", ".mkv", ".avi", ".mov", ".webm", ".flv", ".wmv"],
                ),
            ],
        }
    }
}

impl OrganizerSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        toml::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Load from an explicit path, else from the default location if a file
    /// exists there, else fall back to the built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config_dir>/autosort/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("autosort").join("config.toml"))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the settings and build the runtime configuration
    pub fn resolve(self) -> Result<OrganizerConfig> {
        let root = match self.root {
            Some(root) => expand_home(&root)?,
            None => dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?,
        };
        let root = normalize(&root);

        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if let SettleStrategy::StableSize { checks: 0, .. } = self.settle {
            return Err(ConfigError::Invalid("settle.checks must be at least 1".into()));
        }
        if self.watch.is_empty() {
            return Err(ConfigError::Invalid("no directories to watch".into()));
        }
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("no destination categories".into()));
        }

        let mut watched: Vec<PathBuf> = Vec::with_capacity(self.watch.len());
        for dir in &self.watch {
            let dir = anchor(&root, dir)?;
            if !watched.contains(&dir) {
                watched.push(dir);
            }
        }

        let mut categories = Vec::with_capacity(self.categories.len());
        for category in self.categories {
            let directory = anchor(&root, &category.directory)?;
            categories.push((Category { name: category.name, directory }, category.extensions));
        }
        let classifier = Classifier::from_categories(categories)?;

        Ok(OrganizerConfig {
            root,
            watched,
            classifier,
            workers: self.workers,
            batch_size: self.batch_size,
            settle: self.settle,
        })
    }
}

/// Immutable runtime configuration, built once at startup
#[derive(Debug, Clone)]
pub struct OrganizerConfig {
    root: PathBuf,
    watched: Vec<PathBuf>,
    classifier: Classifier,
    workers: usize,
    batch_size: usize,
    settle: SettleStrategy,
}

impl OrganizerConfig {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn categories(&self) -> &[Category] {
        self.classifier.categories()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn settle(&self) -> SettleStrategy {
        self.settle
    }

    /// True when `path` is a destination directory or lives below one.
    /// Such paths are never organized, which keeps moves from looping.
    pub fn is_within_destination(&self, path: &Path) -> bool {
        self.categories().iter().any(|category| path.starts_with(&category.directory))
    }
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn anchor(root: &Path, path: &Path) -> Result<PathBuf> {
    let path = expand_home(path)?;
    let joined = if path.is_absolute() { path } else { root.join(path) };
    Ok(normalize(&joined))
}

/// Lexically drop `.` components so `root/.` compares equal to `root`
fn normalize(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}
