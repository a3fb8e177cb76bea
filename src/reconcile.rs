//! §4.5 Metadata reconciliation loop: periodic refresh of diff stats,
//! output snapshots, status classification, peer-session detection, and
//! health check / recovery. Grounded on the pack dashboard's tick-driven
//! `refresh()` shape and its multi-interval timer loop, generalized from a
//! single poll to the three independently-scheduled ticks this spec names.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::lifecycle::LifecycleEngine;
use crate::multiplexer::MultiplexerController;
use crate::state::{Instance, OutputSnapshot, Status, StateStore};

pub const METADATA_TICK: Duration = Duration::from_millis(500);
pub const PREVIEW_TICK_LIVE: Duration = Duration::from_millis(100);
pub const PREVIEW_TICK_IDLE: Duration = Duration::from_millis(500);

/// Posted to the UI loop's message queue so it can redraw without waiting
/// for the next frame (§4.5: "a single transition from active->paused
/// forces a UI layout refresh").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    LayoutRefreshNeeded,
    HealthRecovered { title: String },
    Error { title: Option<String>, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// "marked started but multiplexer session missing": recovery attempts
    /// a re-Start.
    MissingMultiplexer,
    /// "worktree path vanished": no recovery, instance is marked Paused.
    WorktreePathVanished,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub title: String,
    pub status: HealthStatus,
    pub recovered: bool,
}

/// One metadata tick over every started, non-paused instance (§4.5).
/// Returns messages the caller should forward to the UI loop.
pub fn metadata_tick(
    engine: &LifecycleEngine,
    instances: &mut [Instance],
    outputs: &mut HashMap<String, OutputSnapshot>,
) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();

    for instance in instances.iter_mut() {
        if !instance.is_started() {
            continue;
        }
        let was_started = instance.is_started();

        if let Err(e) = engine.update_diff_stats(instance) {
            warn!(title = %instance.title, error = %e, "metadata tick: diff update failed");
            messages.push(WorkerMessage::Error {
                title: Some(instance.title.clone()),
                message: e.to_string(),
            });
        }

        // update_diff_stats may have auto-paused the instance if its
        // worktree vanished; that transition forces a layout refresh.
        if was_started && !instance.is_started() {
            messages.push(WorkerMessage::LayoutRefreshNeeded);
            continue;
        }

        let snapshot = outputs.entry(instance.title.clone()).or_default();
        let (output_changed, prompt_detected) = engine.has_updated(instance, snapshot);

        match engine.derive_status(instance, output_changed, prompt_detected) {
            Ok(_auto_confirmed) => {}
            Err(e) => {
                warn!(title = %instance.title, error = %e, "metadata tick: status derivation failed");
                messages.push(WorkerMessage::Error {
                    title: Some(instance.title.clone()),
                    message: e.to_string(),
                });
            }
        }
    }

    messages
}

/// Peer-session detection tick (§4.5): re-load the on-disk instance list;
/// any title not currently tracked is appended to `instances` and persisted
/// back through the store so subsequent saves don't drop it.
pub fn peer_detection_tick(store: &StateStore, instances: &mut Vec<Instance>) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    let on_disk = match store.refresh() {
        Ok(persisted) => persisted.instances,
        Err(e) => {
            warn!(error = %e, "peer detection: refresh failed");
            return messages;
        }
    };

    let known: std::collections::HashSet<_> = instances.iter().map(|i| i.title.clone()).collect();
    let mut adopted = false;
    for disk_instance in on_disk {
        if !known.contains(&disk_instance.title) {
            info!(title = %disk_instance.title, "peer detection: adopting instance created by a peer process");
            instances.push(disk_instance);
            adopted = true;
        }
    }

    if adopted {
        let snapshot = instances.clone();
        if let Err(e) = store.save_instances(snapshot) {
            warn!(error = %e, "peer detection: failed to persist adopted instances");
        }
        messages.push(WorkerMessage::LayoutRefreshNeeded);
    }
    messages
}

/// §4.5 health check: classify each instance Healthy/Unhealthy and attempt
/// recovery for the missing-multiplexer case. Never returns an `Err`; the
/// report is logged and surfaced as a message, not propagated (§7 class 6).
pub fn health_check(
    engine: &LifecycleEngine,
    mux: &dyn MultiplexerController,
    instances: &mut [Instance],
) -> Vec<HealthReport> {
    let mut reports = Vec::new();

    for instance in instances.iter_mut() {
        if !instance.is_started() {
            continue;
        }
        let Some(worktree) = instance.worktree.clone() else {
            continue;
        };

        if !Path::new(&worktree.worktree_path).exists() {
            warn!(title = %instance.title, "health check: worktree path vanished");
            instance.worktree = None;
            instance.status = Status::Paused;
            reports.push(HealthReport {
                title: instance.title.clone(),
                status: HealthStatus::WorktreePathVanished,
                recovered: false,
            });
            continue;
        }

        let exists = mux.does_session_exist(&worktree.session_name).unwrap_or(false);
        if !exists {
            warn!(title = %instance.title, "health check: multiplexer session missing, attempting recovery");
            let recovered = engine.start(instance).is_ok();
            if !recovered {
                warn!(title = %instance.title, "health check: recovery failed, leaving instance in recorded state");
            }
            reports.push(HealthReport {
                title: instance.title.clone(),
                status: HealthStatus::MissingMultiplexer,
                recovered,
            });
        } else {
            reports.push(HealthReport {
                title: instance.title.clone(),
                status: HealthStatus::Healthy,
                recovered: false,
            });
        }
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::{LivePaneInfo, MultiplexerController};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fake multiplexer for tests that need deterministic liveness/capture
    /// without shelling out to a real tmux server.
    struct FakeMux {
        existing: Mutex<std::collections::HashSet<String>>,
        captures: Mutex<HashMap<String, String>>,
    }

    impl FakeMux {
        fn new() -> Self {
            Self {
                existing: Mutex::new(std::collections::HashSet::new()),
                captures: Mutex::new(HashMap::new()),
            }
        }
    }

    impl MultiplexerController for FakeMux {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn start(&self, full_name: &str, _work_dir: &Path, _program: &str) -> anyhow::Result<()> {
            self.existing.lock().unwrap().insert(full_name.to_string());
            Ok(())
        }
        fn restore(&self, full_name: &str, _work_dir: &Path, _program: &str) -> anyhow::Result<()> {
            self.existing.lock().unwrap().insert(full_name.to_string());
            Ok(())
        }
        fn attach(&self, _full_name: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn close(&self, full_name: &str) -> anyhow::Result<()> {
            self.existing.lock().unwrap().remove(full_name);
            Ok(())
        }
        fn does_session_exist(&self, full_name: &str) -> anyhow::Result<bool> {
            Ok(self.existing.lock().unwrap().contains(full_name))
        }
        fn capture_pane_content(&self, full_name: &str, _lines: u16) -> Option<String> {
            self.captures.lock().unwrap().get(full_name).cloned()
        }
        fn send_keys(&self, _full_name: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn tap_enter(&self, _full_name: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn set_detached_size(&self, _full_name: &str, _w: u16, _h: u16) -> anyhow::Result<()> {
            Ok(())
        }
        fn get_live_pane_info(&self, _full_name: &str) -> anyhow::Result<Option<LivePaneInfo>> {
            Ok(None)
        }
        fn wait_until_closed(&self, _full_name: &str, _timeout: Duration) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn make_started_instance(title: &str, worktree_path: PathBuf, session_name: &str) -> Instance {
        use crate::state::{DiffStats, WorktreeHandle};
        Instance {
            title: title.to_string(),
            path: worktree_path.clone(),
            working_dir: worktree_path.clone(),
            branch: format!("workloom/{title}"),
            status: Status::Ready,
            height: 24,
            width: 80,
            created_at: 0,
            updated_at: 0,
            auto_yes: false,
            prompt: None,
            program: "true".into(),
            existing_worktree: None,
            category: None,
            tags: Vec::new(),
            worktree: Some(WorktreeHandle {
                repo_path: PathBuf::new(),
                worktree_path,
                session_name: session_name.to_string(),
                branch_name: format!("workloom/{title}"),
                base_commit_sha: "deadbeef".into(),
            }),
            diff_stats: DiffStats::default(),
        }
    }

    #[test]
    fn health_check_marks_vanished_worktree_as_paused_without_recovery() {
        let mux = Arc::new(FakeMux::new());
        let engine = LifecycleEngine::new(PathBuf::from("/repo"), mux.clone(), "wl-".into());
        let mut instances = vec![make_started_instance(
            "t1",
            PathBuf::from("/nonexistent/workloom-health-check-path"),
            "wl-t1",
        )];

        let reports = health_check(&engine, mux.as_ref(), &mut instances);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, HealthStatus::WorktreePathVanished);
        assert!(!reports[0].recovered);
        assert_eq!(instances[0].status, Status::Paused);
        assert!(instances[0].worktree.is_none());
    }

    #[test]
    fn peer_detection_adopts_unknown_titles() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store
            .save_instances(vec![make_started_instance(
                "peer-created",
                PathBuf::from("/tmp/x"),
                "wl-peer-created",
            )])
            .unwrap();

        let mut local: Vec<Instance> = Vec::new();
        let messages = peer_detection_tick(&store, &mut local);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].title, "peer-created");
        assert!(messages.contains(&WorkerMessage::LayoutRefreshNeeded));
    }
}
