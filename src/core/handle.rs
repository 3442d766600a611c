use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::core::{
    error::{MonitorError, MonitorResult},
    types::{BranchRef, RevisionId},
};

/// How the working directory behind a handle is owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workspace {
    /// Allocated for this handle alone, removed on release.
    Isolated,
    /// The per-branch working copy of the incremental mode. Survives release.
    Reused,
}

/// A working copy checked out at exactly one revision.
///
/// Only one party owns a handle at a time: the materializer creates it, the
/// emitter passes it on, and whoever ends up holding it releases it
/// (explicitly or by dropping it).
pub struct RevisionHandle {
    branch: BranchRef,
    revision: RevisionId,
    path: PathBuf,
    workspace: Workspace,
    released: bool,
}

impl RevisionHandle {
    pub fn new(branch: BranchRef, revision: RevisionId, path: PathBuf, workspace: Workspace) -> Self {
        Self {
            branch,
            revision,
            path,
            workspace,
            released: false,
        }
    }

    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    pub fn revision(&self) -> &RevisionId {
        &self.revision
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workspace(&self) -> Workspace {
        self.workspace
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Gives the working directory back. Calling it again does nothing.
    pub fn release(&mut self) -> MonitorResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if self.workspace == Workspace::Reused {
            return Ok(());
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MonitorError::fatal(
                format!("failed to remove {}", self.path.display()),
                e,
            )),
        }
    }
}

impl Drop for RevisionHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(revision = %self.revision, "dropping handle: {e}");
        }
    }
}

impl fmt::Debug for RevisionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionHandle")
            .field("branch", &self.branch)
            .field("revision", &self.revision.as_str())
            .field("path", &self.path)
            .field("workspace", &self.workspace)
            .field("released", &self.released)
            .finish()
    }
}
