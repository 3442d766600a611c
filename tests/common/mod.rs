#![allow(dead_code)]
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use core_lib::{
    core::{
        emitter::{Acceptance, Subscriber},
        error::{MonitorError, MonitorResult},
        handle::{RevisionHandle, Workspace},
        monitor::{BranchMonitor, FirstObservation},
        state::HeadStateStore,
        types::{BranchRef, RevisionId},
    },
    git::{
        materialize::Materializer,
        repo::{RepositoryLocation, SharedRepository, SourceRepository},
    },
};
use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

pub fn rev(c: char) -> RevisionId {
    RevisionId::parse(&c.to_string().repeat(40)).unwrap()
}

/// A non-bare repository whose HEAD is `refs/heads/main`.
pub fn init_repo(dir: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    Repository::init_opts(dir, &opts).unwrap()
}

pub fn commit_file(repo: &Repository, name: &str, content: &str) -> Oid {
    let workdir = repo.workdir().unwrap();
    fs::write(workdir.join(name), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = Signature::now("revwatch", "revwatch@example.com").unwrap();
    let parents: Vec<Commit> = repo
        .head()
        .ok()
        .and_then(|h| h.peel_to_commit().ok())
        .into_iter()
        .collect();
    let parent_refs: Vec<&Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, &format!("update {name}"), &tree, &parent_refs)
        .unwrap()
}

pub fn shared(dir: &Path) -> SharedRepository {
    SharedRepository::new(
        SourceRepository::open(RepositoryLocation::Local(dir.to_path_buf())).unwrap(),
    )
}

/// Pretends to check out revisions: creates an empty directory per call and
/// records what it was asked for.
#[derive(Clone, Default)]
pub struct FakeMaterializer {
    pub root: PathBuf,
    pub calls: Arc<Mutex<Vec<RevisionId>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub delay: Duration,
    /// Next call checks out this revision instead of the requested one.
    pub drift_to: Arc<Mutex<Option<String>>>,
}

impl FakeMaterializer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<RevisionId> {
        self.calls.lock().unwrap().clone()
    }
}

impl Materializer for FakeMaterializer {
    fn materialize(
        &self,
        _repo: &SourceRepository,
        branch: &BranchRef,
        target: &RevisionId,
    ) -> MonitorResult<RevisionHandle> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);

        let result = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(target.clone());
            match self.drift_to.lock().unwrap().take() {
                Some(actual) => Err(MonitorError::Consistency {
                    expected: target.clone(),
                    actual,
                }),
                None => {
                    let dir = self.root.join(format!("snapshot-{}", calls.len()));
                    fs::create_dir_all(&dir).unwrap();
                    Ok(RevisionHandle::new(
                        branch.clone(),
                        target.clone(),
                        dir,
                        Workspace::Isolated,
                    ))
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Takes every handle and keeps it.
#[derive(Clone, Default)]
pub struct Collector {
    pub handles: Arc<Mutex<Vec<RevisionHandle>>>,
}

impl Collector {
    pub fn revisions(&self) -> Vec<RevisionId> {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.revision().clone())
            .collect()
    }
}

impl Subscriber for Collector {
    fn accept(&self, handle: RevisionHandle) -> Acceptance {
        self.handles.lock().unwrap().push(handle);
        Acceptance::Taken
    }
}

pub struct Decliner;

impl Subscriber for Decliner {
    fn accept(&self, handle: RevisionHandle) -> Acceptance {
        Acceptance::Declined(handle)
    }
}

/// Monitor over a throwaway repository with a fake materializer.
pub struct Fixture {
    pub dir: TempDir,
    pub repo: SharedRepository,
    pub materializer: FakeMaterializer,
    pub collector: Collector,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("source");
        init_repo(&repo_dir);
        let materializer = FakeMaterializer::new(&dir.path().join("scratch"));
        Self {
            repo: shared(&repo_dir),
            dir,
            materializer,
            collector: Collector::default(),
        }
    }

    pub fn monitor(
        &self,
        store: Arc<dyn HeadStateStore>,
        policy: FirstObservation,
    ) -> BranchMonitor {
        BranchMonitor::builder("main", self.repo.clone())
            .store(store)
            .materializer(Box::new(self.materializer.clone()))
            .subscriber(Box::new(self.collector.clone()))
            .first_observation(policy)
            .build()
            .unwrap()
    }
}
