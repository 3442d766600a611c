use anyhow::Result;

use crate::{
    cli::{Cli, Commands},
    core::types::RevisionId,
    daemon::server::DaemonRequest,
};

/// Builds the [`DaemonRequest`] for the given CLI command.
/// Revisions are checked here so a typo never reaches the daemon.
pub fn build_request(cli: &Cli) -> Result<DaemonRequest> {
    match &cli.command {
        Commands::Notify {
            branch,
            repository,
            revision,
        } => {
            let revision = RevisionId::parse(revision)?;
            Ok(DaemonRequest::Notify {
                branch: branch.clone(),
                repository: repository.clone(),
                revision: revision.to_string(),
            })
        }
        Commands::Check { branch, repository } => Ok(DaemonRequest::Check {
            branch: branch.clone(),
            repository: repository.clone(),
        }),
        Commands::Status => Ok(DaemonRequest::Status),
    }
}
