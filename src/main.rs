mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cpp_indexer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Index {
            path,
            full,
            watch,
            jobs,
        } => {
            let context = cli.open(path.as_deref(), *jobs)?;
            cli::index_project(&context, *full, *watch).await?;
        }
        Commands::Status => {
            cli::show_status(&cli.open(None, None)?)?;
        }
        Commands::Symbols { name } => {
            cli::find_symbols(&cli.open(None, None)?, name)?;
        }
        Commands::Outline { file } => {
            cli::show_outline(&cli.open(None, None)?, file)?;
        }
        Commands::Callers { function } => {
            cli::show_callers(&cli.open(None, None)?, function, false)?;
        }
        Commands::Callees { function } => {
            cli::show_callers(&cli.open(None, None)?, function, true)?;
        }
        Commands::Paths { from, to, depth } => {
            cli::show_paths(&cli.open(None, None)?, from, to, *depth)?;
        }
        Commands::Stats => {
            cli::show_stats(&cli.open(None, None)?)?;
        }
        Commands::Clear => {
            cli::clear_index(&cli.open(None, None)?)?;
        }
    }

    Ok(())
}
