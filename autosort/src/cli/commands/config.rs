//! Config command: print the effective configuration

use crate::cli::app::ConfigArgs;
use anyhow::{Context, Result};
use autosort_core::OrganizerSettings;

pub fn execute(settings: OrganizerSettings, args: ConfigArgs) -> Result<()> {
    let settings = if args.default { OrganizerSettings::default() } else { settings };

    // Reject settings that would fail at startup
    settings.clone().resolve().context("Invalid configuration")?;

    let rendered = settings.to_toml().context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
