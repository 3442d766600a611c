pub mod builders;
pub mod client;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_SOCKET;

/// Client for a running revwatchd.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short = 's', long, default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Tell the daemon the branch now points at REVISION.
    Notify {
        #[arg(short = 'b', long)]
        branch: String,
        #[arg(short = 'r', long)]
        repository: Option<String>,
        revision: String,
    },

    /// Ask the daemon to read the branch head itself.
    Check {
        #[arg(short = 'b', long)]
        branch: String,
        #[arg(short = 'r', long)]
        repository: Option<String>,
    },

    Status,
}

/// Daemon command line.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct DaemonArgs {
    #[arg(short = 'c', long, default_value = "revwatch.yml")]
    pub config: PathBuf,

    /// Overrides `socket` from the config file.
    #[arg(short = 's', long)]
    pub socket: Option<PathBuf>,
}
