//! CLI argument definitions for the Tether binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::backend::CLI_NODE;

/// Session storage backend type
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Backend {
    /// SQLite database (default)
    Sqlite,
    /// PostgreSQL database (for shared deployments)
    Postgres,
    /// Ephemeral in-memory storage (for trying commands out)
    Inmemory,
}

/// Tether session administration
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether: inspect and close stored login sessions")]
#[command(version)]
pub struct Cli {
    /// Print JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List open sessions
    List(ListArgs),
    /// Show one session
    Show(ShowArgs),
    /// Close a session
    Close(ShowArgs),
    /// Close open sessions whose time-to-live has elapsed
    Purge(PurgeArgs),
}

/// Where sessions are stored
#[derive(clap::Args, Debug, Clone)]
pub struct BackendArgs {
    /// Storage backend to use
    #[arg(short, long, default_value = "sqlite", env = "TETHER_BACKEND")]
    pub backend: Backend,

    /// Data directory for storage files.
    /// For SQLite: stores tether.db
    #[arg(short = 'D', long, env = "TETHER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// PostgreSQL connection URL (required when backend=postgres)
    #[arg(long, env = "TETHER_POSTGRES_URL")]
    pub postgres_url: Option<String>,

    /// Node to register as. Reusing one name keeps repeated runs from
    /// adding rows to the node registry.
    #[arg(long, default_value = CLI_NODE, env = "TETHER_NODE")]
    pub node: String,
}

/// Arguments for the list command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub backend_config: BackendArgs,

    /// Only list sessions owned by this user id
    #[arg(long)]
    pub owner: Option<i64>,
}

/// Arguments for commands acting on one session
#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub backend_config: BackendArgs,

    /// Session uuid
    pub uuid: String,
}

/// Arguments for the purge command
#[derive(clap::Args, Debug)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub backend_config: BackendArgs,

    /// Report what would be closed without closing anything
    #[arg(long)]
    pub dry_run: bool,
}
