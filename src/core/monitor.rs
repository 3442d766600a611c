use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    core::{
        emitter::{Publication, ResourceEmitter, Subscriber},
        error::{MonitorError, MonitorResult},
        state::HeadStateStore,
        types::{BranchRef, RevisionId},
    },
    git::{
        materialize::Materializer,
        repo::{SharedRepository, SourceRepository},
    },
};

/// What to do with the very first head seen when nothing was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstObservation {
    /// Materialize and publish it like any other change.
    #[default]
    Emit,
    /// Adopt it as the starting point; only later changes are published.
    Baseline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Idle,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub branch: BranchRef,
    pub phase: Phase,
    pub head: Option<RevisionId>,
}

/// Result of a single change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The observed head is the cached one. Nothing happened.
    Unchanged,
    /// Cold start under [`FirstObservation::Baseline`]: the head is cached,
    /// nothing was materialized, published or persisted.
    Baselined(RevisionId),
    Emitted {
        revision: RevisionId,
        publication: Publication,
    },
}

#[derive(Debug, Default)]
struct MonitorState {
    head: Option<RevisionId>,
    bootstrapped: bool,
    processing: bool,
}

/// Watches one branch and hands out a checkout for every new head.
///
/// All work happens while holding the repository lock: compare, materialize,
/// publish, update the cached head, persist. Two notifications for the same
/// repository therefore never overlap, and the second always compares
/// against what the first left behind.
pub struct BranchMonitor {
    branch: BranchRef,
    repository: SharedRepository,
    store: Arc<dyn HeadStateStore>,
    materializer: Box<dyn Materializer>,
    emitter: ResourceEmitter,
    first_observation: FirstObservation,
    state: Mutex<MonitorState>,
}

impl BranchMonitor {
    pub fn builder(branch: impl Into<String>, repository: SharedRepository) -> MonitorBuilder {
        MonitorBuilder::new(branch, repository)
    }

    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    pub fn repository(&self) -> &SharedRepository {
        &self.repository
    }

    pub fn first_observation(&self) -> FirstObservation {
        self.first_observation
    }

    /// Loads the persisted head. Runs once; later calls return straight away.
    pub fn bootstrap(&self) -> MonitorResult<()> {
        let _repo = self.repository.acquire()?;
        let mut state = self.lock_state()?;
        if state.bootstrapped {
            return Ok(());
        }

        let known = self.store.get(&self.branch.key())?;
        match &known {
            Some(head) => info!(branch = %self.branch, head = %head, "restored persisted head"),
            None => info!(branch = %self.branch, "no persisted head"),
        }
        state.head = known;
        state.bootstrapped = true;
        Ok(())
    }

    /// Entry point for "the branch now points at `observed`".
    pub fn on_change_detected(&self, observed: &RevisionId) -> MonitorResult<Outcome> {
        let repo = self.repository.acquire()?;
        let outcome = self.process_locked(&repo, observed);
        drop(repo);
        outcome
    }

    /// Looks up the branch head in the repository itself and processes it.
    pub fn check_latest(&self) -> MonitorResult<Outcome> {
        let repo = self.repository.acquire()?;
        let outcome = repo
            .resolve_head(&self.branch.branch)
            .and_then(|head| self.process_locked(&repo, &head));
        drop(repo);
        outcome
    }

    pub fn status(&self) -> MonitorResult<MonitorStatus> {
        let state = self.lock_state()?;
        let phase = match (state.bootstrapped, state.processing) {
            (false, _) => Phase::Uninitialized,
            (true, false) => Phase::Idle,
            (true, true) => Phase::Processing,
        };
        Ok(MonitorStatus {
            branch: self.branch.clone(),
            phase,
            head: state.head.clone(),
        })
    }

    pub fn cached_head(&self) -> MonitorResult<Option<RevisionId>> {
        Ok(self.lock_state()?.head.clone())
    }

    /// Caller holds the repository lock.
    fn process_locked(
        &self,
        repo: &SourceRepository,
        observed: &RevisionId,
    ) -> MonitorResult<Outcome> {
        let cached = {
            let state = self.lock_state()?;
            if !state.bootstrapped {
                return Err(MonitorError::NotBootstrapped(self.branch.to_string()));
            }
            state.head.clone()
        };

        if cached.as_ref() == Some(observed) {
            debug!(branch = %self.branch, head = %observed, "head unchanged");
            return Ok(Outcome::Unchanged);
        }

        if cached.is_none() && self.first_observation == FirstObservation::Baseline {
            info!(branch = %self.branch, head = %observed, "adopting first observed head as baseline");
            self.lock_state()?.head = Some(observed.clone());
            return Ok(Outcome::Baselined(observed.clone()));
        }

        info!(
            branch = %self.branch,
            old = cached.as_ref().map(RevisionId::as_str).unwrap_or("none"),
            new = %observed,
            "detected head change"
        );

        self.lock_state()?.processing = true;
        let _processing = ProcessingFlag(&self.state);
        self.materialize_and_publish(repo, observed)
    }

    fn materialize_and_publish(
        &self,
        repo: &SourceRepository,
        observed: &RevisionId,
    ) -> MonitorResult<Outcome> {
        let handle = self.materializer.materialize(repo, &self.branch, observed)?;
        debug!(branch = %self.branch, path = %handle.path().display(), "materialized");

        let publication = self.emitter.publish(handle);
        match &publication {
            Publication::Delivered { subscriber } => {
                info!(branch = %self.branch, revision = %observed, subscriber, "published")
            }
            Publication::Unclaimed => {
                warn!(branch = %self.branch, revision = %observed, "no subscriber took the revision")
            }
        }

        let previous = self.lock_state()?.head.replace(observed.clone());
        if let Err(e) = self.store.put(&self.branch.key(), observed) {
            // the next notification for this head has to redo the work
            self.lock_state()?.head = previous;
            return Err(e);
        }
        debug!(branch = %self.branch, revision = %observed, "head persisted");

        Ok(Outcome::Emitted {
            revision: observed.clone(),
            publication,
        })
    }

    fn lock_state(&self) -> MonitorResult<MutexGuard<'_, MonitorState>> {
        self.state
            .lock()
            .map_err(|_| MonitorError::fatal(format!("monitor state for {}", self.branch), "lock poisoned"))
    }
}

/// Clears `processing` when a run ends, unwinding included.
struct ProcessingFlag<'a>(&'a Mutex<MonitorState>);

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .processing = false;
    }
}

/// Collects a monitor's dependencies. Everything is passed in explicitly;
/// nothing is looked up behind the caller's back.
pub struct MonitorBuilder {
    branch: String,
    repository: SharedRepository,
    store: Option<Arc<dyn HeadStateStore>>,
    materializer: Option<Box<dyn Materializer>>,
    emitter: ResourceEmitter,
    first_observation: FirstObservation,
}

impl MonitorBuilder {
    pub fn new(branch: impl Into<String>, repository: SharedRepository) -> Self {
        Self {
            branch: branch.into(),
            repository,
            store: None,
            materializer: None,
            emitter: ResourceEmitter::new(),
            first_observation: FirstObservation::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn HeadStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn materializer(mut self, materializer: Box<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn subscriber(mut self, subscriber: Box<dyn Subscriber>) -> Self {
        self.emitter.subscribe(subscriber);
        self
    }

    pub fn first_observation(mut self, policy: FirstObservation) -> Self {
        self.first_observation = policy;
        self
    }

    pub fn build(self) -> MonitorResult<BranchMonitor> {
        let branch = BranchRef::new(self.repository.identity(), self.branch)?;
        let store = self.store.ok_or_else(|| {
            MonitorError::Configuration(format!("no head store given for {branch}"))
        })?;
        let materializer = self.materializer.ok_or_else(|| {
            MonitorError::Configuration(format!("no materializer given for {branch}"))
        })?;

        Ok(BranchMonitor {
            branch,
            repository: self.repository,
            store,
            materializer,
            emitter: self.emitter,
            first_observation: self.first_observation,
            state: Mutex::new(MonitorState::default()),
        })
    }
}
