//! zgd — the ZoneGrid daemon.
//!
//! Single binary that assembles the ZoneGrid subsystems:
//! - State store (redb)
//! - Catalog (zones, tables, colocation)
//! - Replica manager (assignments, routing, failover)
//! - Membership (nodes, heartbeats, dead-node reaper)
//!
//! # Usage
//!
//! ```text
//! zgd standalone --config zonegrid.toml --data-dir /var/lib/zonegrid
//! zgd exec --data-dir /var/lib/zonegrid --file schema.sql
//! zgd describe --data-dir /var/lib/zonegrid --zone MusicStore
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "zgd", about = "ZoneGrid daemon", version, propagate_version = true)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run a standalone node until Ctrl-C.
    Standalone {
        /// Path to zonegrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state. Overrides `node.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Execute a DDL script against the persisted catalog.
    Exec {
        #[arg(long, default_value = "/var/lib/zonegrid")]
        data_dir: PathBuf,

        /// Script of `;`-separated statements.
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print zones, tables and assignments as JSON.
    Describe {
        #[arg(long, default_value = "/var/lib/zonegrid")]
        data_dir: PathBuf,

        /// Restrict the output to one zone.
        #[arg(long)]
        zone: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Standalone { config, data_dir } => {
            commands::standalone::run(config.as_deref(), data_dir).await
        }
        Command::Exec { data_dir, file } => commands::exec::run(&data_dir, &file).await,
        Command::Describe { data_dir, zone } => commands::describe::run(&data_dir, zone.as_deref()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,zgd=debug,zonegrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
