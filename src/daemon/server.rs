use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::core::{
    emitter::Publication,
    error::MonitorError,
    monitor::{BranchMonitor, MonitorStatus, Outcome},
    types::RevisionId,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action")]
pub enum DaemonRequest {
    /// The branch now points at `revision`.
    #[serde(rename = "notify")]
    Notify {
        branch: String,
        #[serde(default)]
        repository: Option<String>,
        revision: String,
    },

    /// Something changed, read the head from the repository.
    #[serde(rename = "check")]
    Check {
        branch: String,
        #[serde(default)]
        repository: Option<String>,
    },

    #[serde(rename = "status")]
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DaemonResponse {
    Success(String),
    Error { message: String, retryable: bool },
    Status(Vec<MonitorStatus>),
}

/// One configured monitor and the repository string it was configured with.
pub struct WatchedBranch {
    pub source: String,
    pub monitor: Arc<BranchMonitor>,
}

#[derive(Default)]
pub struct DaemonState {
    pub watches: Vec<WatchedBranch>,
}

impl DaemonState {
    /// The monitor for `branch`, narrowed by `repository` when several
    /// repositories have a branch of that name.
    pub fn find(&self, branch: &str, repository: Option<&str>) -> Result<Arc<BranchMonitor>> {
        let candidates: Vec<&WatchedBranch> = self
            .watches
            .iter()
            .filter(|w| w.monitor.branch().branch == branch)
            .filter(|w| {
                repository.is_none_or(|r| r == w.source || r == w.monitor.branch().repository)
            })
            .collect();

        match candidates.as_slice() {
            [only] => Ok(Arc::clone(&only.monitor)),
            [] => Err(anyhow::anyhow!("branch '{branch}' is not monitored")),
            _ => Err(anyhow::anyhow!(
                "branch '{branch}' is monitored in several repositories, pass --repository"
            )),
        }
    }
}

fn describe(outcome: &Outcome, branch: &str) -> String {
    match outcome {
        Outcome::Unchanged => format!("{branch}: already at this revision"),
        Outcome::Baselined(rev) => format!("{branch}: baseline set to {}", rev.short()),
        Outcome::Emitted {
            revision,
            publication: Publication::Delivered { .. },
        } => format!("{branch}: {} delivered", revision.short()),
        Outcome::Emitted {
            revision,
            publication: Publication::Unclaimed,
        } => format!("{branch}: {} materialized, nobody took it", revision.short()),
    }
}

fn error_response(e: &MonitorError) -> DaemonResponse {
    DaemonResponse::Error {
        message: e.to_string(),
        retryable: e.is_recoverable(),
    }
}

async fn run_monitor<F>(monitor: Arc<BranchMonitor>, work: F) -> DaemonResponse
where
    F: FnOnce(&BranchMonitor) -> Result<Outcome, MonitorError> + Send + 'static,
{
    let branch = monitor.branch().branch.clone();
    // monitors block on git and disk I/O for their whole run
    let joined = tokio::task::spawn_blocking(move || work(monitor.as_ref())).await;
    match joined {
        Ok(Ok(outcome)) => DaemonResponse::Success(describe(&outcome, &branch)),
        Ok(Err(e)) => error_response(&e),
        Err(e) => DaemonResponse::Error {
            message: format!("monitor task failed: {e}"),
            retryable: false,
        },
    }
}

/// Handles a request and returns what should be sent back to the client.
pub async fn handle_request(req: DaemonRequest, state: Arc<DaemonState>) -> DaemonResponse {
    match req {
        DaemonRequest::Notify {
            branch,
            repository,
            revision,
        } => {
            let revision = match RevisionId::parse(&revision) {
                Ok(r) => r,
                Err(e) => return error_response(&e),
            };
            match state.find(&branch, repository.as_deref()) {
                Ok(monitor) => {
                    run_monitor(monitor, move |m| m.on_change_detected(&revision)).await
                }
                Err(e) => DaemonResponse::Error {
                    message: e.to_string(),
                    retryable: false,
                },
            }
        }

        DaemonRequest::Check { branch, repository } => {
            match state.find(&branch, repository.as_deref()) {
                Ok(monitor) => run_monitor(monitor, |m| m.check_latest()).await,
                Err(e) => DaemonResponse::Error {
                    message: e.to_string(),
                    retryable: false,
                },
            }
        }

        DaemonRequest::Status => {
            let statuses: Result<Vec<MonitorStatus>, MonitorError> =
                state.watches.iter().map(|w| w.monitor.status()).collect();
            match statuses {
                Ok(s) => DaemonResponse::Status(s),
                Err(e) => error_response(&e),
            }
        }
    }
}

pub async fn send_response<W>(stream: &mut W, response: &DaemonResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response_str = serde_json::to_string(response)? + "\n";
    stream.write_all(response_str.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
