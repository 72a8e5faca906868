use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Parser)]
#[command(name = "vnticks")]
#[command(about = "Vietnamese-market tick ingestion worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the tracked symbol group and batch ticks into storage
    Ingest {
        /// Symbol group to track (e.g. VN30, VN100, HNX30)
        #[arg(short, long)]
        group: Option<String>,

        /// Path to the tick database
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
    /// Resolve and print the symbols of a group (connectivity check)
    Symbols {
        /// Symbol group to resolve
        #[arg(short, long)]
        group: Option<String>,
    },
}

pub async fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { group, database } => {
            commands::ingest::run(group, database).await;
        }
        Commands::Symbols { group } => {
            commands::symbols::run(group).await;
        }
    }
}
