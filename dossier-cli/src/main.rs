//! Dossier CLI: offline research runs, taxonomy inspection and evidence checks.

mod commands;
mod replay;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Dossier: exhaustive, evidence-graded research dossiers
#[derive(Parser, Debug)]
#[command(name = "dossier", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a full research pass against a replay script
    Run {
        /// Research topic
        topic: String,
        /// JSON replay script with canned oracle replies and provider fixtures
        #[arg(short, long)]
        script: PathBuf,
        /// Override the maximum number of rounds
        #[arg(long)]
        max_rounds: Option<usize>,
        /// Disable early stop and always run gap-fill and exhaustion scouts
        #[arg(long)]
        force_exhaustion: bool,
    },
    /// Inspect and grow the tactic taxonomy
    Taxonomy {
        #[command(subcommand)]
        action: TaxonomyAction,
    },
    /// Print the normalized search variants of an address
    Address {
        /// Raw address
        raw: String,
    },
    /// Evaluate the evidence gate over a JSON list of sources
    Evidence {
        /// Path to a JSON array of sources ({ "uri", "title" })
        file: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum TaxonomyAction {
    /// List verticals and subtopics, seed plus accepted growth
    Summary,
    /// Expand every tactic of a vertical with slot values
    Expand {
        /// Vertical id
        vertical: String,
        /// Slot value as key=value (repeatable)
        #[arg(long = "slot", value_name = "KEY=VALUE")]
        slots: Vec<String>,
        /// Keep templates whose slots have no value, with literal placeholders
        #[arg(long)]
        allow_unresolved: bool,
    },
    /// Vet a JSON proposal bundle and persist accepted growth
    Propose {
        /// Path to a JSON proposal bundle
        file: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "dossier", "dossier")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "dossier.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
