//! Scan command: organize existing files once and exit

use crate::cli::ShutdownSignal;
use anyhow::{Context, Result};
use autosort_core::{OrganizerSettings, Supervisor};

pub async fn execute(settings: OrganizerSettings) -> Result<()> {
    let shutdown = ShutdownSignal::install()?;

    let config = settings.resolve().context("Invalid configuration")?;
    let supervisor = Supervisor::new(config);

    supervisor.prepare_destinations().context("Failed to prepare destination directories")?;
    let summary = supervisor
        .scan_backlog_until(shutdown.recv())
        .await
        .context("Backlog scan failed")?;

    println!("Backlog scan");
    println!("============");
    for scan in &summary.scans {
        if scan.skipped {
            println!("  {}: skipped (destination directory)", scan.directory.display());
            continue;
        }
        println!(
            "  {}: {} examined, {} moved, {} failed, {} left in place{}",
            scan.directory.display(),
            scan.examined,
            scan.moved(),
            scan.failed(),
            scan.unmanaged,
            if scan.interrupted { " (interrupted)" } else { "" }
        );
    }
    for (directory, error) in &summary.failures {
        println!("  {}: not scanned ({})", directory.display(), error);
    }
    println!();
    println!("Total moved: {}", summary.moved());
    if summary.interrupted {
        println!("Stopped early; run again to organize the remaining files.");
    }

    Ok(())
}
