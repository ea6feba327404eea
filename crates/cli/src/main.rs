//! Storyloom CLI — the main entry point.
//!
//! Commands:
//! - `status`   — Show a conversation's memory tier occupancy
//! - `rebuild`  — Destructively rebuild a story's knowledge graph

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "storyloom",
    about = "Storyloom — hierarchical memory engine for AI-assisted narrative writing",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show memory tier occupancy for a conversation
    Status {
        /// The conversation to inspect
        #[arg(short, long)]
        conversation: String,

        /// Database path (defaults to the configured db_path)
        #[arg(long)]
        db: Option<String>,
    },

    /// Delete and rebuild a story's knowledge graph from its message log
    Rebuild {
        /// The story whose graph to rebuild
        #[arg(short, long)]
        story: String,

        /// Database path (defaults to the configured db_path)
        #[arg(long)]
        db: Option<String>,

        /// Acknowledge that the existing graph will be deleted first
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Status { conversation, db } => commands::status::run(&conversation, db).await?,
        Commands::Rebuild { story, db, confirm } => {
            commands::rebuild::run(&story, db, confirm).await?
        }
    }

    Ok(())
}
