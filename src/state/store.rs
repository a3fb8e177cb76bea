//! §4.4 State store & lock coordinator: durable, cross-process-safe
//! persistence of the Persisted Store (§3), guarded by a single advisory
//! lock file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs2::FileExt;
use thiserror::Error;
use tracing::warn;

use super::types::{Instance, PersistedStore, UiState};

const LOCK_RETRY_WINDOW: Duration = Duration::from_secs(5);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("timed out acquiring {0} lock on state store after 5s")]
    LockTimeout(&'static str),
    #[error("failed to atomically rename state file: {0}")]
    RenameFailed(String),
}

/// Bounded poll loop over `fs2`'s non-blocking try-lock, per §4.4's
/// 5s-window / 100ms-poll contract.
fn acquire_shared(file: &File) -> Result<()> {
    let deadline = Instant::now() + LOCK_RETRY_WINDOW;
    loop {
        if file.try_lock_shared().is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(StateStoreError::LockTimeout("read").into());
        }
        std::thread::sleep(LOCK_POLL_INTERVAL);
    }
}

fn acquire_exclusive(file: &File) -> Result<()> {
    let deadline = Instant::now() + LOCK_RETRY_WINDOW;
    loop {
        if file.try_lock_exclusive().is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(StateStoreError::LockTimeout("write").into());
        }
        std::thread::sleep(LOCK_POLL_INTERVAL);
    }
}

/// Durable state store. Construct one per process; every read/write opens
/// its own short-lived lock-file handle so the advisory lock is released as
/// soon as the operation completes (never held across a UI frame). Cloning
/// just copies the path handles, not an open file, so the background worker
/// thread (§5) can hold its own copy.
#[derive(Clone)]
pub struct StateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    /// Set when the lock file itself could not be created; operations then
    /// degrade to lock-free with a one-time warning (§4.4).
    lock_unavailable: bool,
}

impl StateStore {
    pub fn new(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;
        let state_path = state_dir.join("state.json");
        let lock_path = state_dir.join("state.lock");

        let lock_unavailable = match OpenOptions::new().create(true).write(true).open(&lock_path) {
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, path = %lock_path.display(), "state store: lock file unavailable, degrading to lock-free");
                true
            }
        };

        Ok(Self {
            state_path,
            lock_path,
            lock_unavailable,
        })
    }

    fn open_lock_file(&self) -> Result<Option<File>> {
        if self.lock_unavailable {
            return Ok(None);
        }
        Ok(Some(
            OpenOptions::new()
                .create(true)
                .write(true)
                .open(&self.lock_path)
                .with_context(|| format!("failed to open lock file {}", self.lock_path.display()))?,
        ))
    }

    fn read_locked(&self) -> Result<PersistedStore> {
        let lock = self.open_lock_file()?;
        if let Some(lock) = &lock {
            acquire_shared(lock)?;
        }
        let result = self.read_unlocked();
        if let Some(lock) = &lock {
            let _ = lock.unlock();
        }
        result
    }

    fn read_unlocked(&self) -> Result<PersistedStore> {
        if !self.state_path.exists() {
            return Ok(PersistedStore::default());
        }
        let contents = std::fs::read_to_string(&self.state_path)
            .with_context(|| format!("failed to read state file {}", self.state_path.display()))?;
        if contents.trim().is_empty() {
            return Ok(PersistedStore::default());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("malformed state file {}", self.state_path.display()))
    }

    /// Temp-then-rename atomic write. Same-filesystem rename is mandated;
    /// the temp file is created as a sibling of the target.
    fn write_atomic(&self, store: &PersistedStore) -> Result<()> {
        let json =
            serde_json::to_string_pretty(store).context("failed to serialize state store")?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        let write_result = (|| -> Result<()> {
            let mut tmp = File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
            std::fs::rename(&tmp_path, &self.state_path)
                .map_err(|e| StateStoreError::RenameFailed(e.to_string()))?;
            Ok(())
        })();
        if write_result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        write_result
    }

    /// §4.4 cooperative merge: re-read on-disk instances, index both sets by
    /// title, writer's version wins on collision, disk-only titles are
    /// appended. If the re-read itself fails, proceed with only the
    /// writer's data and warn (§4.4 failure semantics).
    fn merge_instances(&self, writer_instances: Vec<Instance>) -> Vec<Instance> {
        let on_disk = match self.read_unlocked() {
            Ok(store) => store.instances,
            Err(e) => {
                warn!(error = %e, "state store: merge read failed, saving writer's data only");
                return writer_instances;
            }
        };

        let mut by_title: std::collections::HashMap<String, Instance> = writer_instances
            .into_iter()
            .map(|i| (i.title.clone(), i))
            .collect();
        for disk_instance in on_disk {
            by_title.entry(disk_instance.title.clone()).or_insert(disk_instance);
        }
        by_title.into_values().collect()
    }

    fn with_write_lock<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        let lock = self.open_lock_file()?;
        if let Some(lock) = &lock {
            acquire_exclusive(lock)?;
        }
        let result = f(self);
        if let Some(lock) = &lock {
            let _ = lock.unlock();
        }
        result
    }

    /// Save a full instance list, merged cooperatively with whatever is
    /// currently on disk.
    pub fn save_instances(&self, instances: Vec<Instance>) -> Result<()> {
        self.with_write_lock(|this| {
            let merged = this.merge_instances(instances);
            let mut store = this.read_unlocked().unwrap_or_default();
            store.instances = merged;
            this.write_atomic(&store)
        })
    }

    /// Refresh from disk first, then return the current (possibly
    /// peer-updated) instance list.
    pub fn get_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.read_locked()?.instances)
    }

    pub fn delete_all_instances(&self) -> Result<()> {
        self.with_write_lock(|this| {
            let mut store = this.read_unlocked().unwrap_or_default();
            store.instances.clear();
            this.write_atomic(&store)
        })
    }

    pub fn get_help_screens_seen(&self) -> Result<u32> {
        Ok(self.read_locked()?.help_screens_seen)
    }

    pub fn set_help_screens_seen(&self, bitmask: u32) -> Result<()> {
        self.with_write_lock(|this| {
            let mut store = this.read_unlocked().unwrap_or_default();
            store.help_screens_seen = bitmask;
            this.write_atomic(&store)
        })
    }

    pub fn get_ui_state(&self) -> Result<UiState> {
        Ok(self.read_locked()?.ui)
    }

    pub fn set_ui_state(&self, ui: UiState) -> Result<()> {
        self.with_write_lock(|this| {
            let mut store = this.read_unlocked().unwrap_or_default();
            store.ui = ui;
            this.write_atomic(&store)
        })
    }

    /// Force a re-read from disk (used by the peer-detection tick).
    pub fn refresh(&self) -> Result<PersistedStore> {
        self.read_locked()
    }

    /// Releasing the lock happens per-operation already; `close` exists for
    /// the symmetry the shutdown sequence (§5) expects and is a no-op here.
    pub fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{DiffStats, Status};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn make_instance(title: &str) -> Instance {
        Instance {
            title: title.to_string(),
            path: PathBuf::new(),
            working_dir: PathBuf::new(),
            branch: format!("wl/{title}"),
            status: Status::Ready,
            height: 24,
            width: 80,
            created_at: 0,
            updated_at: 0,
            auto_yes: false,
            prompt: None,
            program: "claude".into(),
            existing_worktree: None,
            category: None,
            tags: Vec::new(),
            worktree: None,
            diff_stats: DiffStats::default(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save_instances(vec![make_instance("t1")]).unwrap();
        let loaded = store.get_instances().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "t1");
    }

    #[test]
    fn save_save_load_is_byte_stable_modulo_key_order() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save_instances(vec![make_instance("t1")]).unwrap();
        let first = store.get_instances().unwrap();
        store.save_instances(first.clone()).unwrap();
        let second = store.get_instances().unwrap();
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn cooperative_merge_keeps_peer_only_titles() {
        let dir = TempDir::new().unwrap();
        let store_a = StateStore::new(dir.path()).unwrap();
        let store_b = StateStore::new(dir.path()).unwrap();

        store_a.save_instances(vec![make_instance("alpha")]).unwrap();
        store_b.save_instances(vec![make_instance("beta")]).unwrap();

        let titles: std::collections::HashSet<_> = store_a
            .get_instances()
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(
            titles,
            ["alpha", "beta"].into_iter().map(String::from).collect()
        );
    }

    #[test]
    fn writer_version_wins_on_title_collision() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save_instances(vec![make_instance("t1")]).unwrap();

        let mut updated = make_instance("t1");
        updated.status = Status::Paused;
        store.save_instances(vec![updated]).unwrap();

        let loaded = store.get_instances().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, Status::Paused);
    }

    #[test]
    fn ui_state_fields_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let mut ui = UiState::default();
        ui.hide_paused = true;
        store.set_ui_state(ui).unwrap();

        let mut ui2 = store.get_ui_state().unwrap();
        ui2.category_expanded.insert("backend".to_string(), true);
        store.set_ui_state(ui2).unwrap();

        let final_ui = store.get_ui_state().unwrap();
        assert!(final_ui.hide_paused);
        assert_eq!(final_ui.category_expanded.get("backend"), Some(&true));
    }

    #[test]
    fn help_screens_seen_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.set_help_screens_seen(0b101).unwrap();
        assert_eq!(store.get_help_screens_seen().unwrap(), 0b101);
    }

    #[test]
    fn delete_all_instances_clears_the_list() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save_instances(vec![make_instance("t1"), make_instance("t2")]).unwrap();
        store.delete_all_instances().unwrap();
        assert!(store.get_instances().unwrap().is_empty());
    }
}
