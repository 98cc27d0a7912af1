//! ctsearch: download clinical trial data and enrich it with LLM-generated
//! tags.

mod commands;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;

use ctsearch_core::defaults;

#[derive(Parser)]
#[command(name = "ctsearch")]
#[command(author, version, about = "Clinical trial download and LLM tag enrichment")]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the latest AACT daily snapshot
    DownloadAact {
        /// Directory to store downloaded data
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Download the ClinicalTrials.gov bulk JSON export
    DownloadBulk {
        /// Directory to store downloaded data
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Search ClinicalTrials.gov and save the results
    Search {
        /// Search query
        query: String,

        /// Maximum number of studies to fetch
        #[arg(long, default_value_t = 100)]
        max_results: usize,

        /// Fields to request (comma separated, default: the tagging fields)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Directory to store downloaded data
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Tag trials from a JSON file
    TagFile {
        /// Input JSON file: a list of trials or a saved search
        #[arg(short, long)]
        input_file: PathBuf,

        /// Output file (default: <input>_processed.json)
        #[arg(short, long)]
        output_file: Option<PathBuf>,

        /// Maximum number of trials to process (default: all)
        #[arg(long)]
        max_trials: Option<usize>,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Tag unprocessed trials in the database
    TagDb {
        #[command(flatten)]
        batch: BatchArgs,

        /// Apply schema migrations before processing
        #[arg(long)]
        migrate: bool,

        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Show processing counts
    Status {
        #[command(flatten)]
        db: DbArgs,
    },
}

#[derive(Args, Debug)]
pub struct LlmArgs {
    /// API key for the LLM service
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model to use for tagging
    #[arg(long, env = "ANTHROPIC_MODEL", default_value = defaults::GEN_MODEL)]
    pub model: String,

    /// Override the API endpoint
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Args, Debug)]
pub struct DbArgs {
    /// Full connection URL; overrides the individual --db-* flags
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "postgres", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "DB_NAME", default_value = "aact")]
    pub db_name: String,
}

/// Unset flags fall back to `BATCH_*` environment variables, then defaults.
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Trials requested per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum number of trials to process (default: all)
    #[arg(long)]
    pub max_trials: Option<usize>,

    /// Concurrent tagging calls within a batch
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Version recorded with each processed trial
    #[arg(long)]
    pub processing_version: Option<i32>,

    /// Re-tag trials whose previous attempt failed
    #[arg(long)]
    pub retry_failed: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = telemetry::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::DownloadAact { data_dir } => commands::download_aact(&data_dir).await,
        Commands::DownloadBulk { data_dir } => commands::download_bulk(&data_dir).await,
        Commands::Search {
            query,
            max_results,
            fields,
            data_dir,
        } => commands::search(&data_dir, &query, max_results, &fields).await,
        Commands::TagFile {
            input_file,
            output_file,
            max_trials,
            llm,
        } => commands::tag_file(&llm, &input_file, output_file, max_trials).await,
        Commands::TagDb {
            batch,
            migrate,
            llm,
            db,
        } => commands::tag_db(&llm, &db, &batch, migrate).await,
        Commands::Status { db } => commands::status(&db).await,
    }
}
