mod common;

use std::{
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use common::{Decliner, Fixture, rev};
use core_lib::core::{
    emitter::{Acceptance, Publication, Subscriber},
    error::{MonitorError, MonitorResult},
    handle::RevisionHandle,
    monitor::{BranchMonitor, FirstObservation, Outcome, Phase},
    state::{HeadStateStore, MemoryHeadStore},
    types::RevisionId,
};
use pretty_assertions::assert_eq;

const KEY: &str = "refs/heads/main";

#[test]
fn test_change_is_materialized_published_and_persisted() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::with_entry(KEY, rev('a')));
    let monitor = fx.monitor(store.clone(), FirstObservation::Emit);
    monitor.bootstrap()?;

    let outcome = monitor.on_change_detected(&rev('b'))?;

    assert_eq!(
        outcome,
        Outcome::Emitted {
            revision: rev('b'),
            publication: Publication::Delivered { subscriber: 0 },
        }
    );
    assert_eq!(fx.materializer.calls(), vec![rev('b')]);
    assert_eq!(fx.collector.revisions(), vec![rev('b')]);
    assert_eq!(monitor.cached_head()?, Some(rev('b')));
    assert_eq!(store.get(KEY)?, Some(rev('b')));
    Ok(())
}

#[test]
fn test_same_head_is_a_no_op() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::with_entry(KEY, rev('a')));
    let monitor = fx.monitor(store.clone(), FirstObservation::Emit);
    monitor.bootstrap()?;

    assert_eq!(monitor.on_change_detected(&rev('a'))?, Outcome::Unchanged);
    monitor.on_change_detected(&rev('b'))?;
    assert_eq!(monitor.on_change_detected(&rev('b'))?, Outcome::Unchanged);

    assert_eq!(fx.materializer.calls(), vec![rev('b')]);
    assert_eq!(fx.collector.revisions(), vec![rev('b')]);
    Ok(())
}

#[test]
fn test_every_distinct_change_is_emitted_once() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let monitor = fx.monitor(Arc::new(MemoryHeadStore::new()), FirstObservation::Emit);
    monitor.bootstrap()?;

    let heads = vec![rev('1'), rev('2'), rev('1'), rev('3'), rev('4')];
    for head in &heads {
        monitor.on_change_detected(head)?;
        // repeated notification for the same head
        monitor.on_change_detected(head)?;
    }

    assert_eq!(fx.materializer.calls(), heads);
    assert_eq!(fx.collector.revisions(), heads);

    let dirs: Vec<_> = fx
        .collector
        .handles
        .lock()
        .unwrap()
        .iter()
        .map(|h| h.path().to_path_buf())
        .collect();
    let unique: HashSet<_> = dirs.iter().collect();
    assert_eq!(unique.len(), dirs.len(), "each handle owns its own directory");
    Ok(())
}

#[test]
fn test_restart_reads_persisted_head() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store: Arc<MemoryHeadStore> = Arc::new(MemoryHeadStore::new());

    let first = fx.monitor(store.clone(), FirstObservation::Emit);
    first.bootstrap()?;
    first.on_change_detected(&rev('b'))?;
    drop(first);

    let second = fx.monitor(store.clone(), FirstObservation::Emit);
    second.bootstrap()?;
    assert_eq!(second.cached_head()?, Some(rev('b')));
    assert_eq!(second.on_change_detected(&rev('b'))?, Outcome::Unchanged);
    assert_eq!(fx.materializer.calls().len(), 1);
    Ok(())
}

#[test]
fn test_crash_before_persist_re_emits_after_restart() -> anyhow::Result<()> {
    let fx = Fixture::new();
    // B was published, but the process died before the store write
    let store = Arc::new(MemoryHeadStore::with_entry(KEY, rev('a')));
    fx.materializer.calls.lock().unwrap().push(rev('b'));

    let restarted = fx.monitor(store.clone(), FirstObservation::Emit);
    restarted.bootstrap()?;
    assert_eq!(restarted.cached_head()?, Some(rev('a')));

    let outcome = restarted.on_change_detected(&rev('b'))?;

    assert!(matches!(outcome, Outcome::Emitted { .. }));
    assert_eq!(fx.materializer.calls(), vec![rev('b'), rev('b')]);
    assert_eq!(store.get(KEY)?, Some(rev('b')));
    Ok(())
}

#[test]
fn test_cold_start_emits_first_observation() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::new());
    let monitor = fx.monitor(store.clone(), FirstObservation::Emit);
    monitor.bootstrap()?;
    assert_eq!(monitor.cached_head()?, None);

    let outcome = monitor.on_change_detected(&rev('a'))?;

    assert!(matches!(outcome, Outcome::Emitted { .. }));
    assert_eq!(fx.collector.revisions(), vec![rev('a')]);
    assert_eq!(store.get(KEY)?, Some(rev('a')));
    Ok(())
}

#[test]
fn test_cold_start_baseline_skips_first_observation() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::new());
    let monitor = fx.monitor(store.clone(), FirstObservation::Baseline);
    monitor.bootstrap()?;

    assert_eq!(monitor.on_change_detected(&rev('a'))?, Outcome::Baselined(rev('a')));
    assert!(fx.materializer.calls().is_empty());
    assert!(fx.collector.revisions().is_empty());
    assert!(store.is_empty());
    assert_eq!(monitor.cached_head()?, Some(rev('a')));

    assert_eq!(monitor.on_change_detected(&rev('a'))?, Outcome::Unchanged);
    assert!(matches!(
        monitor.on_change_detected(&rev('b'))?,
        Outcome::Emitted { .. }
    ));
    assert_eq!(fx.collector.revisions(), vec![rev('b')]);
    assert_eq!(store.get(KEY)?, Some(rev('b')));
    Ok(())
}

#[test]
fn test_baseline_is_ignored_when_a_head_is_persisted() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::with_entry(KEY, rev('a')));
    let monitor = fx.monitor(store, FirstObservation::Baseline);
    monitor.bootstrap()?;

    assert!(matches!(
        monitor.on_change_detected(&rev('b'))?,
        Outcome::Emitted { .. }
    ));
    Ok(())
}

#[test]
fn test_concurrent_notifications_never_overlap() -> anyhow::Result<()> {
    let mut fx = Fixture::new();
    fx.materializer.delay = Duration::from_millis(50);
    let monitor = Arc::new(fx.monitor(Arc::new(MemoryHeadStore::new()), FirstObservation::Emit));
    monitor.bootstrap()?;

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.on_change_detected(&rev('b')).unwrap())
        })
        .collect();
    let outcomes: Vec<Outcome> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let emitted = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Emitted { .. }))
        .count();
    assert_eq!(emitted, 1, "later callers must see the first call's head");
    assert_eq!(outcomes.len() - emitted, 3);
    assert_eq!(fx.materializer.calls(), vec![rev('b')]);
    assert_eq!(fx.materializer.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_monitors_sharing_a_repository_are_serialized() -> anyhow::Result<()> {
    let mut fx = Fixture::new();
    fx.materializer.delay = Duration::from_millis(30);
    let store: Arc<MemoryHeadStore> = Arc::new(MemoryHeadStore::new());

    let main = Arc::new(fx.monitor(store.clone(), FirstObservation::Emit));
    let dev = Arc::new(
        BranchMonitor::builder("dev", fx.repo.clone())
            .store(store.clone())
            .materializer(Box::new(fx.materializer.clone()))
            .build()?,
    );
    main.bootstrap()?;
    dev.bootstrap()?;

    let a = {
        let main = Arc::clone(&main);
        thread::spawn(move || main.on_change_detected(&rev('a')).map(|_| ()))
    };
    let b = {
        let dev = Arc::clone(&dev);
        thread::spawn(move || dev.on_change_detected(&rev('b')).map(|_| ()))
    };
    a.join().unwrap()?;
    b.join().unwrap()?;

    assert_eq!(fx.materializer.calls().len(), 2);
    assert_eq!(fx.materializer.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(store.get("refs/heads/dev")?, Some(rev('b')));
    Ok(())
}

#[test]
fn test_consistency_failure_leaves_state_untouched() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::with_entry(KEY, rev('a')));
    let monitor = fx.monitor(store.clone(), FirstObservation::Emit);
    monitor.bootstrap()?;
    *fx.materializer.drift_to.lock().unwrap() = Some(rev('c').to_string());

    let err = monitor.on_change_detected(&rev('b')).unwrap_err();

    assert!(matches!(err, MonitorError::Consistency { .. }), "got {err:?}");
    assert!(!err.is_recoverable());
    assert_eq!(monitor.cached_head()?, Some(rev('a')));
    assert_eq!(store.get(KEY)?, Some(rev('a')));
    assert!(fx.collector.revisions().is_empty());
    assert_eq!(monitor.status()?.phase, Phase::Idle);

    // the same head goes through once the race is over
    assert!(matches!(
        monitor.on_change_detected(&rev('b'))?,
        Outcome::Emitted { .. }
    ));
    Ok(())
}

#[test]
fn test_unclaimed_revision_still_counts_as_delivered() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::new());
    let monitor = BranchMonitor::builder("main", fx.repo.clone())
        .store(store.clone())
        .materializer(Box::new(fx.materializer.clone()))
        .subscriber(Box::new(Decliner))
        .build()?;
    monitor.bootstrap()?;

    let outcome = monitor.on_change_detected(&rev('b'))?;

    assert_eq!(
        outcome,
        Outcome::Emitted {
            revision: rev('b'),
            publication: Publication::Unclaimed,
        }
    );
    assert_eq!(store.get(KEY)?, Some(rev('b')));
    assert!(
        !fx.dir.path().join("scratch").join("snapshot-1").exists(),
        "unclaimed snapshot must be removed"
    );
    Ok(())
}

#[test]
fn test_notification_before_bootstrap_is_rejected() {
    let fx = Fixture::new();
    let monitor = fx.monitor(Arc::new(MemoryHeadStore::new()), FirstObservation::Emit);

    assert_eq!(monitor.status().unwrap().phase, Phase::Uninitialized);
    let err = monitor.on_change_detected(&rev('b')).unwrap_err();
    assert!(matches!(err, MonitorError::NotBootstrapped(_)));
    assert!(fx.materializer.calls().is_empty());
}

#[test]
fn test_bootstrap_twice_keeps_first_result() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(MemoryHeadStore::with_entry(KEY, rev('a')));
    let monitor = fx.monitor(store.clone(), FirstObservation::Emit);
    monitor.bootstrap()?;
    monitor.on_change_detected(&rev('b'))?;

    store.put(KEY, &rev('c'))?;
    monitor.bootstrap()?;

    assert_eq!(monitor.cached_head()?, Some(rev('b')));
    Ok(())
}

#[test]
fn test_builder_requires_store_and_materializer() {
    let fx = Fixture::new();
    let missing_store = BranchMonitor::builder("main", fx.repo.clone())
        .materializer(Box::new(fx.materializer.clone()))
        .build();
    assert!(matches!(missing_store, Err(MonitorError::Configuration(_))));

    let bad_branch = BranchMonitor::builder("bad..name", fx.repo.clone())
        .store(Arc::new(MemoryHeadStore::new()))
        .materializer(Box::new(fx.materializer.clone()))
        .build();
    assert!(matches!(bad_branch, Err(MonitorError::Configuration(_))));
}

/// Store whose writes can be switched off.
struct FlakyStore {
    inner: MemoryHeadStore,
    broken: AtomicBool,
}

impl HeadStateStore for FlakyStore {
    fn get(&self, key: &str) -> MonitorResult<Option<RevisionId>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, revision: &RevisionId) -> MonitorResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(MonitorError::fatal("writing head state", "disk full"));
        }
        self.inner.put(key, revision)
    }
}

#[test]
fn test_persist_failure_reaches_caller_and_keeps_previous_head() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let store = Arc::new(FlakyStore {
        inner: MemoryHeadStore::with_entry(KEY, rev('a')),
        broken: AtomicBool::new(true),
    });
    let monitor = fx.monitor(store.clone(), FirstObservation::Emit);
    monitor.bootstrap()?;

    let err = monitor.on_change_detected(&rev('b')).unwrap_err();
    assert!(matches!(err, MonitorError::Fatal { .. }), "got {err:?}");
    assert!(!err.is_recoverable());
    assert_eq!(store.get(KEY)?, Some(rev('a')));
    assert_eq!(monitor.cached_head()?, Some(rev('a')));
    assert_eq!(monitor.status()?.phase, Phase::Idle);

    // once the store works again the same head is emitted a second time
    store.broken.store(false, Ordering::SeqCst);
    let outcome = monitor.on_change_detected(&rev('b'))?;
    assert!(matches!(outcome, Outcome::Emitted { .. }));
    assert_eq!(fx.collector.revisions(), vec![rev('b'), rev('b')]);
    assert_eq!(store.get(KEY)?, Some(rev('b')));
    Ok(())
}

struct Panicker;

impl Subscriber for Panicker {
    fn accept(&self, _handle: RevisionHandle) -> Acceptance {
        panic!("subscriber blew up");
    }
}

#[test]
fn test_panicking_subscriber_leaves_monitor_idle() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let monitor = BranchMonitor::builder("main", fx.repo.clone())
        .store(Arc::new(MemoryHeadStore::new()))
        .materializer(Box::new(fx.materializer.clone()))
        .subscriber(Box::new(Panicker))
        .build()?;
    monitor.bootstrap()?;

    let run = panic::catch_unwind(AssertUnwindSafe(|| monitor.on_change_detected(&rev('b'))));

    assert!(run.is_err());
    assert_eq!(monitor.status()?.phase, Phase::Idle);
    assert_eq!(monitor.cached_head()?, None);
    Ok(())
}
