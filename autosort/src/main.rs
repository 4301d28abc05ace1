use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();

    // Initialize tracing with appropriate verbosity
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        2.. => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let settings = cli.settings()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("File Organizer - Starting up...");
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cli::commands::run::execute(settings))?;
        }
        Commands::Scan => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cli::commands::scan::execute(settings))?;
        }
        Commands::Classify(args) => {
            cli::commands::classify::execute(settings, args)?;
        }
        Commands::Config(args) => {
            cli::commands::config::execute(settings, args)?;
        }
    }

    Ok(())
}
