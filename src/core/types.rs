use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{MonitorError, MonitorResult};

/// Content hash naming one commit. Always lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
    pub fn parse(text: &str) -> MonitorResult<Self> {
        let text = text.trim();
        let valid_len = text.len() == 40 || text.len() == 64;
        if !valid_len || !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MonitorError::Configuration(format!(
                "`{text}` is not a full commit id"
            )));
        }
        Ok(Self(text.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8]
    }

    pub fn to_oid(&self) -> MonitorResult<git2::Oid> {
        git2::Oid::from_str(&self.0)
            .map_err(|e| MonitorError::Configuration(format!("bad object id {}: {e}", self.0)))
    }
}

impl From<git2::Oid> for RevisionId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

impl TryFrom<String> for RevisionId {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RevisionId::parse(&value)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which branch of which repository a monitor is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchRef {
    pub repository: String,
    pub branch: String,
}

impl BranchRef {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> MonitorResult<Self> {
        let repository = repository.into();
        let branch = branch.into();
        if repository.trim().is_empty() {
            return Err(MonitorError::Configuration(
                "repository identity is empty".to_string(),
            ));
        }
        if branch.trim().is_empty() {
            return Err(MonitorError::Configuration("branch name is empty".to_string()));
        }
        if !git2::Reference::is_valid_name(&format!("refs/heads/{branch}")) {
            return Err(MonitorError::Configuration(format!(
                "`{branch}` is not a valid branch name"
            )));
        }
        Ok(Self { repository, branch })
    }

    /// Fully-qualified ref, also the key under which the head is persisted.
    pub fn key(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.branch)
    }
}
