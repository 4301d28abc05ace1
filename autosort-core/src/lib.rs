//! Core functionality for autosort
//!
//! This crate contains the file organizer: configuration, extension
//! classification, collision-safe moves, the backlog scanner and the
//! per-directory live watchers.

pub mod config;
pub mod organizer;

pub use config::{ConfigError, OrganizerConfig, OrganizerSettings, SettleStrategy};
pub use organizer::{MoveOutcome, OrganizeError, Supervisor, SupervisorReport};
