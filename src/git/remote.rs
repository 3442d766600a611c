use git2::{Direction, Remote};

use crate::core::{
    error::{MonitorError, MonitorResult},
    types::RevisionId,
};

/// Reads `refs/heads/<branch>` straight from a remote, without cloning.
/// `Ok(None)` when the remote has no such branch.
pub fn remote_branch_head(url: &str, branch: &str) -> MonitorResult<Option<RevisionId>> {
    let mut remote =
        Remote::create_detached(url).map_err(|e| MonitorError::recoverable("connect", e))?;
    remote
        .connect(Direction::Fetch)
        .map_err(|e| MonitorError::recoverable("connect", e))?;

    let wanted = format!("refs/heads/{branch}");
    let head = remote
        .list()
        .map_err(|e| MonitorError::recoverable("ls-remote", e))?
        .iter()
        .find(|r| r.name() == wanted)
        .map(|r| RevisionId::from(r.oid()));

    remote
        .disconnect()
        .map_err(|e| MonitorError::recoverable("disconnect", e))?;
    Ok(head)
}

/// `owner/name` part of a remote URL, used as the repository identity.
///
/// Understands `scheme://host/path`, scp-like `user@host:path` and bare
/// `host/path` forms. Needs at least two path segments.
pub fn extract_repo_path(remote: &str) -> anyhow::Result<String> {
    let s = remote.trim();
    if s.is_empty() {
        anyhow::bail!("empty remote");
    }

    let path = if let Some((_, rest)) = s.split_once("://") {
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => anyhow::bail!("no path after host in `{s}`"),
        }
    } else if let Some((_, rest)) = s.rsplit_once(':') {
        rest
    } else if let Some((_, rest)) = s.split_once('/').filter(|_| !s.contains(' ')) {
        rest
    } else {
        anyhow::bail!("Failed to extract repo remote path from `{s}`");
    };

    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if segments.len() < 2 {
        anyhow::bail!("Incorrect remote path: {path}");
    }
    Ok(segments.join("/"))
}
