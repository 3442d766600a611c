use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use git2::{ErrorCode, Repository, build::CheckoutBuilder, build::RepoBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        error::{MonitorError, MonitorResult},
        handle::{RevisionHandle, Workspace},
        id::{scratch_name, slug},
        types::{BranchRef, RevisionId},
    },
    git::repo::SourceRepository,
};

/// Turns a revision of a repository into a checked-out working copy.
pub trait Materializer: Send + Sync {
    fn materialize(
        &self,
        repo: &SourceRepository,
        branch: &BranchRef,
        target: &RevisionId,
    ) -> MonitorResult<RevisionHandle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeMode {
    /// Full clone into a brand-new directory for every revision.
    #[default]
    FreshClone,
    /// One working copy per branch, fetched into and re-checked-out.
    /// Handles share that directory, so an earlier snapshot changes under
    /// whoever still reads it.
    IncrementalReuse,
}

pub struct GitMaterializer {
    scratch_root: PathBuf,
    mode: MaterializeMode,
}

const ALLOCATION_ATTEMPTS: usize = 3;

impl GitMaterializer {
    pub fn new(scratch_root: impl Into<PathBuf>, mode: MaterializeMode) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            mode,
        }
    }

    pub fn mode(&self) -> MaterializeMode {
        self.mode
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// A directory nobody has used before.
    fn allocate(&self, branch: &BranchRef) -> MonitorResult<PathBuf> {
        fs::create_dir_all(&self.scratch_root).map_err(|e| {
            MonitorError::fatal(
                format!("cannot create scratch root {}", self.scratch_root.display()),
                e,
            )
        })?;

        let mut last_err = std::io::Error::from(ErrorKind::AlreadyExists);
        for _ in 0..ALLOCATION_ATTEMPTS {
            let dir = self.scratch_root.join(scratch_name(&branch.branch));
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last_err = e,
                Err(e) => {
                    return Err(MonitorError::fatal(
                        format!("cannot allocate scratch directory {}", dir.display()),
                        e,
                    ));
                }
            }
        }
        Err(MonitorError::fatal(
            "cannot allocate a fresh scratch directory",
            last_err,
        ))
    }

    fn fresh_clone(
        &self,
        repo: &SourceRepository,
        branch: &BranchRef,
        target: &RevisionId,
    ) -> MonitorResult<RevisionHandle> {
        let dir = self.allocate(branch)?;
        let checked_out = RepoBuilder::new()
            .clone(&repo.clone_url(), &dir)
            .map_err(|e| MonitorError::recoverable("clone", e))
            .and_then(|clone| checkout_exact(&clone, target));

        match checked_out {
            Ok(()) => Ok(RevisionHandle::new(
                branch.clone(),
                target.clone(),
                dir,
                Workspace::Isolated,
            )),
            Err(e) => {
                discard(&dir);
                Err(e)
            }
        }
    }

    fn incremental(
        &self,
        repo: &SourceRepository,
        branch: &BranchRef,
        target: &RevisionId,
    ) -> MonitorResult<RevisionHandle> {
        let dir = self
            .scratch_root
            .join(format!("{}-reuse", slug(&branch.branch)));

        let working_copy = if dir.join(".git").exists() {
            let existing =
                Repository::open(&dir).map_err(|e| MonitorError::recoverable("open", e))?;
            existing
                .find_remote("origin")
                .and_then(|mut origin| {
                    origin.fetch(&["+refs/heads/*:refs/remotes/origin/*"], None, None)
                })
                .map_err(|e| MonitorError::recoverable("fetch", e))?;
            existing
        } else {
            fs::create_dir_all(&dir).map_err(|e| {
                MonitorError::fatal(format!("cannot create {}", dir.display()), e)
            })?;
            match RepoBuilder::new().clone(&repo.clone_url(), &dir) {
                Ok(clone) => clone,
                Err(e) => {
                    discard(&dir);
                    return Err(MonitorError::recoverable("clone", e));
                }
            }
        };

        checkout_exact(&working_copy, target)?;
        Ok(RevisionHandle::new(
            branch.clone(),
            target.clone(),
            dir,
            Workspace::Reused,
        ))
    }
}

impl Materializer for GitMaterializer {
    fn materialize(
        &self,
        repo: &SourceRepository,
        branch: &BranchRef,
        target: &RevisionId,
    ) -> MonitorResult<RevisionHandle> {
        match self.mode {
            MaterializeMode::FreshClone => self.fresh_clone(repo, branch, target),
            MaterializeMode::IncrementalReuse => self.incremental(repo, branch, target),
        }
    }
}

/// Detaches HEAD on `target`, forces the tree to match, then checks the
/// HEAD recorded on disk is `target`.
fn checkout_exact(repo: &Repository, target: &RevisionId) -> MonitorResult<()> {
    let commit = match repo.find_commit(target.to_oid()?) {
        Ok(c) => c,
        Err(e) if e.code() == ErrorCode::NotFound => {
            return Err(MonitorError::RevisionNotFound(target.clone()));
        }
        Err(e) => return Err(MonitorError::recoverable("checkout", e)),
    };

    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
        .map_err(|e| MonitorError::recoverable("checkout", e))?;
    repo.set_head_detached(commit.id())
        .map_err(|e| MonitorError::recoverable("checkout", e))?;

    // read HEAD back from disk rather than from the handle that wrote it
    let reopened =
        Repository::open(repo.path()).map_err(|e| MonitorError::recoverable("checkout", e))?;
    let head = reopened
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| MonitorError::recoverable("checkout", e))?;
    if head.id().to_string() != target.as_str() {
        return Err(MonitorError::Consistency {
            expected: target.clone(),
            actual: head.id().to_string(),
        });
    }
    Ok(())
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!("failed to discard {}: {e}", dir.display());
    }
}
