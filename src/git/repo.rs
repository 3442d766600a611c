use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use git2::{ErrorCode, Repository};

use crate::{
    core::{
        error::{MonitorError, MonitorResult},
        types::RevisionId,
    },
    git::remote::{extract_repo_path, remote_branch_head},
};

/// Where the watched history lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryLocation {
    Local(PathBuf),
    Remote(String),
}

impl RepositoryLocation {
    /// `https://…`, `ssh://…`, `file://…` and scp-like `user@host:path` are
    /// remote; everything else is a path on this machine.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let scp_like = s
            .split_once(':')
            .is_some_and(|(host, _)| host.contains('@') && !host.contains('/'));
        if s.contains("://") || scp_like {
            RepositoryLocation::Remote(s.to_string())
        } else {
            RepositoryLocation::Local(PathBuf::from(s))
        }
    }
}

/// The repository a monitor reads from. Only touched through [`SharedRepository::acquire`].
pub struct SourceRepository {
    location: RepositoryLocation,
    identity: String,
    local: Option<Repository>,
}

impl SourceRepository {
    pub fn open(location: RepositoryLocation) -> MonitorResult<Self> {
        match &location {
            RepositoryLocation::Local(path) => {
                let repo = Repository::open(path).map_err(|e| {
                    MonitorError::Configuration(format!(
                        "cannot open repository {}: {}",
                        path.display(),
                        e.message()
                    ))
                })?;
                let identity = path
                    .canonicalize()
                    .unwrap_or_else(|_| path.clone())
                    .display()
                    .to_string();
                Ok(Self {
                    location,
                    identity,
                    local: Some(repo),
                })
            }
            RepositoryLocation::Remote(url) => {
                let identity = extract_repo_path(url).map_err(|e| {
                    MonitorError::Configuration(format!("bad repository url `{url}`: {e}"))
                })?;
                Ok(Self {
                    location,
                    identity,
                    local: None,
                })
            }
        }
    }

    pub fn location(&self) -> &RepositoryLocation {
        &self.location
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// What the materializer clones from.
    pub fn clone_url(&self) -> String {
        match (&self.location, &self.local) {
            (_, Some(repo)) => repo.path().display().to_string(),
            (RepositoryLocation::Remote(url), None) => url.clone(),
            (RepositoryLocation::Local(path), None) => path.display().to_string(),
        }
    }

    /// Current head of `branch` in this repository.
    pub fn resolve_head(&self, branch: &str) -> MonitorResult<RevisionId> {
        let not_found = || MonitorError::RefNotFound {
            repository: self.identity.clone(),
            branch: branch.to_string(),
        };

        let Some(repo) = &self.local else {
            return remote_branch_head(&self.clone_url(), branch)?.ok_or_else(not_found);
        };

        let reference = match repo.find_reference(&format!("refs/heads/{branch}")) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => return Err(not_found()),
            Err(e) => return Err(MonitorError::recoverable("read ref", e)),
        };
        let commit = reference
            .peel_to_commit()
            .map_err(|e| MonitorError::recoverable("read ref", e))?;
        Ok(commit.id().into())
    }
}

/// A repository plus the lock serialising all work on it.
///
/// Monitors watching different branches of the same repository clone the
/// same `SharedRepository`, so at most one materialization runs per
/// repository at any time.
#[derive(Clone)]
pub struct SharedRepository {
    identity: Arc<str>,
    inner: Arc<Mutex<SourceRepository>>,
}

impl SharedRepository {
    pub fn new(repo: SourceRepository) -> Self {
        Self {
            identity: Arc::from(repo.identity()),
            inner: Arc::new(Mutex::new(repo)),
        }
    }

    pub fn open(location: RepositoryLocation) -> MonitorResult<Self> {
        Ok(Self::new(SourceRepository::open(location)?))
    }

    /// Readable without taking the lock.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Blocks until no one else works on this repository.
    pub fn acquire(&self) -> MonitorResult<MutexGuard<'_, SourceRepository>> {
        self.inner.lock().map_err(|_| {
            MonitorError::fatal(
                format!("repository lock for {}", self.identity),
                "poisoned by a panicking holder",
            )
        })
    }

    pub fn same_as(&self, other: &SharedRepository) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
