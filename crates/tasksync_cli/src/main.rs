//! tasksync CLI
//!
//! Command-line tools for inspecting and editing tasksync user stores.
//!
//! # Commands
//!
//! - `inspect` - Display store revision, record counts and tags
//! - `changes` - Dump the change feed after a baseline revision
//! - `get` - Show one record with its field revisions
//! - `create` / `update` - Write a record the way a client would
//!
//! The store must not be open in a running server: the store directory is
//! locked by whoever holds it.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasksync_core::UserId;
use tracing_subscriber::EnvFilter;

/// tasksync store tools.
#[derive(Parser)]
#[command(name = "tasksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory holding per-user stores
    #[arg(global = true, short, long, default_value = "./dbs")]
    data_dir: PathBuf,

    /// User whose store to open
    #[arg(global = true, short, long)]
    user: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store revision, record counts and tags
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the change feed after a baseline revision
    Changes {
        /// Baseline revision (0 dumps every record as a create)
        #[arg(short, long, default_value = "0")]
        since: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one record with its field revisions
    Get {
        /// Record kind (task, sprint, todo)
        kind: String,

        /// Record key
        key: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create a record
    Create {
        /// Record kind (task, sprint, todo)
        kind: String,

        /// Record key
        key: String,

        /// Field assignment `name=value`; the value is JSON, or a plain string
        #[arg(short, long = "set")]
        sets: Vec<String>,

        /// Tag to apply
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// Update a record relative to a baseline revision
    Update {
        /// Record kind (task, sprint, todo)
        kind: String,

        /// Record key
        key: String,

        /// Revision the edit is based on
        #[arg(short, long)]
        baseline: u64,

        /// Modification `name=value` (use `tags.<label>=false` to untag)
        #[arg(short, long = "set")]
        sets: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Cli {
        data_dir,
        user,
        verbose,
        command,
    } = Cli::parse();

    // Initialize logging
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = command {
        println!("tasksync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("tasksync core v{}", tasksync_core::VERSION);
        return Ok(());
    }

    let user = UserId::parse(user.ok_or("--user is required")?)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match command {
            Commands::Inspect { format } => commands::inspect::run(&data_dir, &user, &format).await,
            Commands::Changes { since, format } => {
                commands::changes::run(&data_dir, &user, since, &format).await
            }
            Commands::Get { kind, key, format } => {
                commands::get::run(&data_dir, &user, &kind, &key, &format).await
            }
            Commands::Create {
                kind,
                key,
                sets,
                tags,
            } => commands::write::create(&data_dir, &user, &kind, &key, &sets, &tags).await,
            Commands::Update {
                kind,
                key,
                baseline,
                sets,
            } => commands::write::update(&data_dir, &user, &kind, &key, baseline, &sets).await,
            Commands::Version => Ok(()),
        }
    })
}
