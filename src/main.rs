mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dayweave::config::DayweaveConfig;

#[derive(Parser)]
#[command(
    name = "dayweave",
    version,
    about = "Incremental day-transcript segmentation MCP server"
)]
struct Cli {
    /// Config file (defaults to ~/.dayweave/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (transport from config unless --http is given)
    Serve {
        /// Serve Streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Submit one transcript fragment
    Ingest {
        /// Calendar day, YYYY-MM-DD
        day: String,
        /// Fragment text (may start with a [time] marker)
        text: String,
        #[arg(long)]
        user: Option<String>,
        /// Local time the fragment describes (RFC 3339 or HH:MM)
        #[arg(long)]
        at: Option<String>,
    },
    /// Split a transcript file into fragments and submit them in order
    IngestFile {
        path: PathBuf,
        /// Calendar day, YYYY-MM-DD
        #[arg(long)]
        day: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Show a day's events
    Query {
        day: String,
        #[arg(long)]
        user: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a day's reflection
    Reflection {
        day: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run one background sweep over pending and stale chunks
    ProcessPending,
    /// Put a failed chunk back in the queue
    ResetChunk { chunk_id: String },
    /// Delete a day's events, chunks and reflection
    ResetDay {
        day: String,
        #[arg(long)]
        user: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show store statistics
    Stats {
        #[arg(long)]
        user: Option<String>,
    },
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = match &cli.config {
        Some(path) => DayweaveConfig::load_from(path)?,
        None => DayweaveConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http || config.server.transport == "http" {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Ingest {
            day,
            text,
            user,
            at,
        } => cli::ingest::ingest(&config, user, &day, text, at.as_deref()).await?,
        Command::IngestFile { path, day, user } => {
            cli::ingest::ingest_file(&config, user, &day, &path).await?
        }
        Command::Query { day, user, json } => cli::query::query(&config, user, &day, json).await?,
        Command::Reflection { day, user, json } => {
            cli::query::reflection(&config, user, &day, json).await?
        }
        Command::ProcessPending => cli::process::process_pending(&config).await?,
        Command::ResetChunk { chunk_id } => cli::reset::reset_chunk(&config, &chunk_id).await?,
        Command::ResetDay { day, user, yes } => {
            cli::reset::reset_day(&config, user, &day, yes).await?
        }
        Command::Stats { user } => cli::stats::stats(&config, user.as_deref())?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
