//! §3 Data Model: the Session Instance, its owned aggregates, and the
//! Persisted Store's wire shape.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// §3: one of {Running, Ready, NeedsApproval, Paused, Stopped}. §6 specifies
/// the persisted/wire shape as an integer enum, so the discriminant is what
/// gets serialized rather than a string variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Status {
    Running,
    Ready,
    NeedsApproval,
    Paused,
    Stopped,
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Status::Running => 0,
            Status::Ready => 1,
            Status::NeedsApproval => 2,
            Status::Paused => 3,
            Status::Stopped => 4,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Running),
            1 => Ok(Status::Ready),
            2 => Ok(Status::NeedsApproval),
            3 => Ok(Status::Paused),
            4 => Ok(Status::Stopped),
            other => Err(format!("{other} is not a valid status discriminant")),
        }
    }
}

/// §3 Worktree Handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeHandle {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
}

/// §3 Diff Snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub content: String,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// §3 Output Snapshot. Not persisted across restarts (it is re-derived from
/// the live multiplexer on the next tick) but lives alongside the instance
/// in memory, so it is modeled here for a single shared representation.
#[derive(Debug, Clone, Default)]
pub struct OutputSnapshot {
    pub last_captured: String,
    pub generation: u64,
}

/// §3 Session Instance, as persisted. `worktree` is `None` before `Start`
/// has ever run once for a just-constructed, unstarted instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub title: String,
    pub path: PathBuf,
    pub working_dir: PathBuf,
    pub branch: String,
    pub status: Status,
    pub height: u16,
    pub width: u16,
    pub created_at: u64,
    pub updated_at: u64,
    pub auto_yes: bool,
    pub prompt: Option<String>,
    pub program: String,
    pub existing_worktree: Option<PathBuf>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub worktree: Option<WorktreeHandle>,
    #[serde(default)]
    pub diff_stats: DiffStats,
}

impl Instance {
    pub fn is_started(&self) -> bool {
        self.worktree.is_some() && !matches!(self.status, Status::Paused | Status::Stopped)
    }
}

/// §4.6 per-category-expanded map + the rest of the persisted view state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiState {
    #[serde(default)]
    pub hide_paused: bool,
    #[serde(default)]
    pub category_expanded: HashMap<String, bool>,
    #[serde(default)]
    pub search_mode: bool,
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub selected_idx: i64,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            hide_paused: false,
            category_expanded: HashMap::new(),
            search_mode: false,
            search_query: String::new(),
            selected_idx: 0,
        }
    }
}

/// §3/§6 Persisted Store wire shape: `{help_screens_seen, instances, ui}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStore {
    #[serde(default)]
    pub help_screens_seen: u32,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub ui: UiState,
}

impl Default for PersistedStore {
    fn default() -> Self {
        Self {
            help_screens_seen: 0,
            instances: Vec::new(),
            ui: UiState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_its_integer_discriminant() {
        assert_eq!(serde_json::to_string(&Status::Running).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Status::Stopped).unwrap(), "4");
        assert_eq!(
            serde_json::from_str::<Status>("2").unwrap(),
            Status::NeedsApproval
        );
        assert!(serde_json::from_str::<Status>("9").is_err());
    }

    #[test]
    fn default_persisted_store_is_empty() {
        let store = PersistedStore::default();
        assert_eq!(store.help_screens_seen, 0);
        assert!(store.instances.is_empty());
        assert!(!store.ui.hide_paused);
    }

    #[test]
    fn instance_started_iff_worktree_present_and_not_paused() {
        let base = Instance {
            title: "t1".into(),
            path: PathBuf::new(),
            working_dir: PathBuf::new(),
            branch: "wl/t1".into(),
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
        };
        assert!(!base.is_started());

        let with_worktree = Instance {
            worktree: Some(WorktreeHandle {
                repo_path: PathBuf::new(),
                worktree_path: PathBuf::new(),
                session_name: "wl-t1".into(),
                branch_name: "wl/t1".into(),
                base_commit_sha: "abc".into(),
            }),
            ..base.clone()
        };
        assert!(with_worktree.is_started());

        let paused = Instance {
            status: Status::Paused,
            ..with_worktree
        };
        assert!(!paused.is_started());
    }
}
