mod ask;
mod ingest;
mod query;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gigscout::GigscoutConfig;

use ask::AskArgs;
use query::QueryMode;

#[derive(Parser)]
#[command(
    name = "gigscout",
    version,
    about = "Concert poster ingestion and CSV query agents"
)]
struct Cli {
    /// Path to a gigscout.toml config file (default: ./gigscout.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt to the configured model
    Ask(AskArgs),

    /// Extract concert data from every image in a folder, aggregated by band
    Extract {
        /// Folder of poster images
        folder: PathBuf,
    },

    /// Process images already in the watch folder, then watch it for new ones
    Watch {
        /// Folder to watch (overrides pipeline.watch_folder)
        #[arg(long)]
        folder: Option<PathBuf>,

        /// CSV file to append to (overrides pipeline.csv_output)
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Ask questions about the concert CSV
    Query {
        /// Embed the whole CSV in the prompt, or query it through MCP tools
        #[arg(long, value_enum, default_value_t = QueryMode::Embed)]
        mode: QueryMode,

        /// CSV file to query (overrides query.csv_file)
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Serve the CSV query tools over MCP on stdin/stdout
    ServeMcp {
        /// CSV file to query (overrides query.csv_file)
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config =
        GigscoutConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Ask(args) => ask::run(&config, args).await,
        Command::Extract { folder } => ingest::extract(&config, &folder).await,
        Command::Watch { folder, csv } => ingest::watch(&config, folder, csv).await,
        Command::Query { mode, csv } => query::run(&config, mode, csv).await,
        Command::ServeMcp { csv } => query::serve_mcp(&config, csv).await,
    }
}
