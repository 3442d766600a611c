use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::core::{
    error::{MonitorError, MonitorResult},
    id::{short_id, slug},
    types::RevisionId,
};

/// Durable `refs/heads/<branch>` -> revision mapping.
pub trait HeadStateStore: Send + Sync {
    fn get(&self, key: &str) -> MonitorResult<Option<RevisionId>>;

    /// Must not return before the value would survive a crash.
    fn put(&self, key: &str, revision: &RevisionId) -> MonitorResult<()>;
}

#[derive(Default)]
pub struct MemoryHeadStore {
    heads: Mutex<BTreeMap<String, RevisionId>>,
}

impl MemoryHeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, revision: RevisionId) -> Self {
        let store = Self::default();
        if let Ok(mut heads) = store.heads.lock() {
            heads.insert(key.to_string(), revision);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.heads.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeadStateStore for MemoryHeadStore {
    fn get(&self, key: &str) -> MonitorResult<Option<RevisionId>> {
        let heads = self
            .heads
            .lock()
            .map_err(|_| MonitorError::fatal("head store", "lock poisoned"))?;
        Ok(heads.get(key).cloned())
    }

    fn put(&self, key: &str, revision: &RevisionId) -> MonitorResult<()> {
        let mut heads = self
            .heads
            .lock()
            .map_err(|_| MonitorError::fatal("head store", "lock poisoned"))?;
        heads.insert(key.to_string(), revision.clone());
        Ok(())
    }
}

/// Default directory for head files: `<data_local_dir>/revwatch`.
pub fn default_state_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("revwatch")
}

/// Head file for one repository inside `state_dir`.
pub fn state_file_for(state_dir: &Path, repository: &str) -> PathBuf {
    state_dir.join(format!("{}.json", slug(repository)))
}

/// Heads kept in a small JSON object on disk.
///
/// Every `put` rewrites the whole file through a synced temp file and a
/// rename, so a reader only ever sees the old or the new content.
pub struct JsonHeadStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonHeadStore {
    pub fn open(path: impl Into<PathBuf>) -> MonitorResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                MonitorError::fatal(format!("failed to create {}", parent.display()), e)
            })?;
        }
        let store = Self {
            path,
            write_lock: Mutex::new(()),
        };
        // surface a corrupt file at startup rather than at the first change
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> MonitorResult<BTreeMap<String, RevisionId>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(MonitorError::fatal(
                    format!("failed to read {}", self.path.display()),
                    e,
                ));
            }
        };
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data)
            .map_err(|e| MonitorError::fatal(format!("corrupt head file {}", self.path.display()), e))
    }

    fn write_durably(&self, heads: &BTreeMap<String, RevisionId>) -> MonitorResult<()> {
        let json = serde_json::to_string_pretty(heads)
            .map_err(|e| MonitorError::fatal("failed to encode heads", e))?;
        let tmp = self.path.with_extension(format!("tmp-{}", short_id()));
        let storage = |e: std::io::Error| {
            MonitorError::fatal(format!("failed to write {}", self.path.display()), e)
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(storage)?;
        let written = file
            .write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .and_then(|_| fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(storage(e));
        }

        // make the rename itself durable
        if let Some(parent) = self.path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(dir).and_then(|d| d.sync_all()).map_err(storage)?;
        }
        Ok(())
    }
}

impl HeadStateStore for JsonHeadStore {
    fn get(&self, key: &str) -> MonitorResult<Option<RevisionId>> {
        Ok(self.load()?.remove(key))
    }

    fn put(&self, key: &str, revision: &RevisionId) -> MonitorResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| MonitorError::fatal("head store", "lock poisoned"))?;
        let mut heads = self.load()?;
        heads.insert(key.to_string(), revision.clone());
        self.write_durably(&heads)
    }
}
