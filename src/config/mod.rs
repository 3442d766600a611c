use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    core::{monitor::FirstObservation, state::default_state_dir},
    git::{materialize::MaterializeMode, repo::RepositoryLocation},
};

pub mod parser;

pub const DEFAULT_SOCKET: &str = "/tmp/revwatchd.sock";

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Local path or URL of the watched repository.
    pub repository: String,
    pub branch: String,
    #[serde(default = "default_true")]
    pub emit_on_first_observation: bool,
    #[serde(default)]
    pub mode: MaterializeMode,
}

impl MonitorConfig {
    pub fn first_observation(&self) -> FirstObservation {
        if self.emit_on_first_observation {
            FirstObservation::Emit
        } else {
            FirstObservation::Baseline
        }
    }

    pub fn location(&self) -> RepositoryLocation {
        RepositoryLocation::parse(&self.repository)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DaemonConfig {
    pub scratch_root: PathBuf,

    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub socket: Option<PathBuf>,

    pub monitors: Vec<MonitorConfig>,
}

impl DaemonConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET))
    }
}
