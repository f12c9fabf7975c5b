// ABOUTME: CLI entry point for seren-transfer
// ABOUTME: Parses commands and routes to the dump, import, migrate and tables handlers

use clap::{Parser, Subcommand};
use seren_transfer::commands::{self, JobOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seren-transfer")]
#[command(about = "Dump, import and migrate tables between SQLite, PostgreSQL and files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump tables or a query to script, delimited, report or schema-only files
    Dump {
        /// Source database (postgresql:// URL or SQLite file)
        #[arg(long)]
        source: String,
        /// Tables to dump (comma-separated); several tables run concurrently
        #[arg(long, value_delimiter = ',')]
        table: Vec<String>,
        /// Output file, or a directory when dumping several tables
        #[arg(long)]
        output: PathBuf,
        #[command(flatten)]
        options: JobOptions,
        /// Print job results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a script or delimited file into a table
    Import {
        /// Target database (postgresql:// URL or SQLite file)
        #[arg(long)]
        target: String,
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        options: JobOptions,
        #[arg(long)]
        json: bool,
    },
    /// Copy tables directly from one database to another
    Migrate {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
        /// Tables to migrate (comma-separated)
        #[arg(long, value_delimiter = ',')]
        table: Vec<String>,
        /// Destination table name when migrating a single table
        #[arg(long)]
        target_table: Option<String>,
        #[command(flatten)]
        options: JobOptions,
        #[arg(long)]
        json: bool,
    },
    /// List tables in a source database with row estimates
    Tables {
        #[arg(long)]
        source: String,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dump {
            source,
            table,
            output,
            options,
            json,
        } => commands::dump(&source, &table, &output, &options, json).await,
        Commands::Import {
            target,
            table,
            input,
            options,
            json,
        } => commands::import(&target, table.as_deref(), &input, &options, json).await,
        Commands::Migrate {
            source,
            target,
            table,
            target_table,
            options,
            json,
        } => {
            commands::migrate(
                &source,
                &target,
                &table,
                target_table.as_deref(),
                &options,
                json,
            )
            .await
        }
        Commands::Tables { source, json } => commands::tables(&source, json).await,
    }
}
