pub mod app;
pub mod commands;
pub mod signal;

pub use app::{Cli, Commands};
pub use signal::ShutdownSignal;
