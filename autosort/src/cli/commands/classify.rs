//! Classify command: show where files would be moved without touching them

use crate::cli::app::ClassifyArgs;
use anyhow::{Context, Result};
use autosort_core::OrganizerSettings;
use autosort_core::organizer::resolver::plan_move;

pub fn execute(settings: OrganizerSettings, args: ClassifyArgs) -> Result<()> {
    let config = settings.resolve().context("Invalid configuration")?;

    for path in &args.paths {
        match config.classifier().classify(path) {
            Some(category) => {
                let destination = plan_move(config.classifier(), path, |_| false)
                    .map(|operation| operation.destination)
                    .unwrap_or_else(|| category.directory.clone());
                println!("{}: {} → {}", path.display(), category.name, destination.display());
            }
            None => println!("{}: unmanaged", path.display()),
        }
    }

    Ok(())
}
