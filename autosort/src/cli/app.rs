use anyhow::{Context, Result};
use autosort_core::OrganizerSettings;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "autosort",
    version,
    about = "Autosort - Keep your home and download folders tidy",
    long_about = "Autosort watches a few directories and moves new files into Music, Pictures, Videos and study_materials folders by extension, never overwriting anything already there."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base directory for destinations and relative watch paths (defaults to home)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Directory to watch; repeat to watch several. Replaces the configured list
    #[arg(short, long, global = true)]
    pub watch: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Organize existing files, then watch for new ones (default)
    #[command(about = "Organize existing files, then watch for new ones until interrupted")]
    Run,

    /// Organize existing files once and exit
    #[command(about = "Organize the files already present in every watched directory, then exit")]
    Scan,

    /// Show where files would go
    #[command(about = "Show the category and destination for the given files")]
    Classify(ClassifyArgs),

    /// Print the effective configuration
    #[command(about = "Print the effective configuration as TOML")]
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// Files to classify
    #[arg(help = "Paths to classify", required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the loaded configuration
    #[arg(long, help = "Print built-in defaults, ignoring config files and flags")]
    pub default: bool,
}

impl Cli {
    /// Load settings from the config file and apply command-line overrides
    pub fn settings(&self) -> Result<OrganizerSettings> {
        let mut settings = OrganizerSettings::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(root) = &self.root {
            settings.root = Some(root.clone());
        }
        if !self.watch.is_empty() {
            settings.watch = self.watch.clone();
        }

        Ok(settings)
    }
}
