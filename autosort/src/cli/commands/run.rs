//! Run command: organize the backlog, then watch until interrupted

use crate::cli::ShutdownSignal;
use anyhow::{Context, Result};
use autosort_core::{OrganizerSettings, Supervisor};
use tracing::info;

pub async fn execute(settings: OrganizerSettings) -> Result<()> {
    // Before any move starts, so a signal never interrupts one midway
    let shutdown = ShutdownSignal::install()?;

    let config = settings.resolve().context("Invalid configuration")?;
    info!("Organizing into {}", config.root().display());

    let report = Supervisor::new(config)
        .run(shutdown.recv())
        .await
        .context("File organizer failed")?;

    let failed = report.backlog.failed()
        + report.watchers.iter().map(|(_, stats)| stats.failed).sum::<usize>();
    info!("Session summary: {} files moved, {} failed", report.moved(), failed);

    Ok(())
}
