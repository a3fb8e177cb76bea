//! §4.1 Session lifecycle engine: deterministic transitions between
//! instance states, each combining a worktree operation and a multiplexer
//! operation. No single teacher file matches this shape directly; its
//! orchestration (a worktree op followed by a multiplexer op, with no
//! partial artifacts left behind on failure) is grounded on the
//! `create`/`cleanup` call sequencing in the pack's workflow module.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::git;
use crate::multiplexer::{self, MultiplexerController};
use crate::state::{Instance, OutputSnapshot, Status, WorktreeHandle};

pub const MAX_TITLE_LEN: usize = 32;
pub const MAX_INSTANCES: usize = 100;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("title is {0} characters, exceeds the {MAX_TITLE_LEN}-character limit")]
    TitleTooLong(usize),
    #[error("instance limit ({MAX_INSTANCES}) reached")]
    InstanceLimitReached,
    #[error("a branch named '{0}' is already in use by another session")]
    BranchCollision(String),
    #[error("cannot kill: branch '{0}' is checked out in another worktree")]
    BranchCheckedOutElsewhere(String),
    #[error("instance is paused or not started")]
    NotAttachable,
}

/// Validate a title against §8's boundary behaviors: length 0 rejected,
/// length 32 accepted, length 33 rejected.
pub fn validate_title(title: &str) -> Result<()> {
    if title.is_empty() {
        return Err(LifecycleError::EmptyTitle.into());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(LifecycleError::TitleTooLong(title.chars().count()).into());
    }
    Ok(())
}

pub fn validate_instance_count(current: usize) -> Result<()> {
    if current >= MAX_INSTANCES {
        return Err(LifecycleError::InstanceLimitReached.into());
    }
    Ok(())
}

/// Derive a git-safe branch name from a title: `<prefix>/<slug>`.
pub fn derive_branch_name(title: &str) -> String {
    let slug: String = title
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let collapsed = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    format!("workloom/{collapsed}")
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn prompt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(do you want to proceed|\(y/n\)|press enter to continue|waiting for (your )?(confirmation|approval))")
            .expect("static prompt regex is valid")
    })
}

/// Heuristic "is the agent waiting on confirmation" marker (§4.1
/// `HasUpdated`'s prompt component).
pub fn looks_like_prompt(output: &str) -> bool {
    prompt_regex().is_match(output)
}

/// Coordinates a worktree operation and a multiplexer operation per
/// transition; owns no instance state itself (instances live in the list
/// view by stable title identity, per §9). Cheap to clone (a path, a
/// string, and an `Arc`), so the background worker thread (§5) holds its
/// own copy rather than sharing one behind a lock.
#[derive(Clone)]
pub struct LifecycleEngine {
    repo_path: PathBuf,
    mux: Arc<dyn MultiplexerController>,
    tmux_prefix: String,
}

impl LifecycleEngine {
    pub fn new(repo_path: PathBuf, mux: Arc<dyn MultiplexerController>, tmux_prefix: String) -> Self {
        Self {
            repo_path,
            mux,
            tmux_prefix,
        }
    }

    fn worktree_base_dir(&self) -> PathBuf {
        self.repo_path.join("worktrees")
    }

    fn session_name(&self, title: &str) -> String {
        multiplexer::session_name(&self.tmux_prefix, title)
    }

    /// §4.1 `Start(firstTime)`. On any failure, no partial artifacts are
    /// left: if the worktree was created but the multiplexer failed to
    /// start, the worktree is torn back down before the error propagates.
    pub fn start(&self, instance: &mut Instance) -> Result<()> {
        validate_title(&instance.title)?;

        let worktree_path = instance
            .existing_worktree
            .clone()
            .unwrap_or_else(|| self.worktree_base_dir().join(&instance.title));

        let base_commit = git::setup(&self.repo_path, &worktree_path, &instance.branch)
            .context("failed to set up worktree")?;

        let session_name = self.session_name(&instance.title);
        if let Err(e) = self.mux.start(&session_name, &worktree_path, &instance.program) {
            warn!(title = %instance.title, error = %e, "start: multiplexer failed, rolling back worktree");
            let _ = git::cleanup(&self.repo_path, &worktree_path, &instance.branch);
            return Err(e).context("failed to start multiplexer session");
        }

        instance.worktree = Some(WorktreeHandle {
            repo_path: self.repo_path.clone(),
            worktree_path: worktree_path.clone(),
            session_name,
            branch_name: instance.branch.clone(),
            base_commit_sha: base_commit,
        });
        instance.path = worktree_path.clone();
        instance.working_dir = worktree_path;
        instance.status = Status::Ready;
        let now = now_unix();
        instance.created_at = now;
        instance.updated_at = now;
        info!(title = %instance.title, "lifecycle: started");
        Ok(())
    }

    /// §4.1 `Pause`: commit pending changes with an auto-generated message,
    /// remove the worktree (branch kept), close the multiplexer.
    pub fn pause(&self, instance: &mut Instance) -> Result<()> {
        let Some(worktree) = instance.worktree.clone() else {
            return Ok(());
        };

        if worktree.worktree_path.exists() {
            let message = format!("workloom: auto-commit before pausing '{}'", instance.title);
            git::commit_all(&worktree.worktree_path, &message)
                .context("failed to auto-commit before pause")?;
        }

        let _ = self.mux.close(&worktree.session_name);
        git::remove_keep_branch(&self.repo_path, &worktree.worktree_path)
            .context("failed to remove worktree on pause")?;

        instance.worktree = None;
        instance.status = Status::Paused;
        instance.updated_at = now_unix();
        info!(title = %instance.title, "lifecycle: paused");
        Ok(())
    }

    /// §4.1 `Resume`: re-create the worktree from the preserved branch and
    /// restart the multiplexer in the restored worktree directory.
    pub fn resume(&self, instance: &mut Instance) -> Result<()> {
        let worktree_path = self.worktree_base_dir().join(&instance.title);
        let base_commit = git::setup(&self.repo_path, &worktree_path, &instance.branch)
            .context("failed to re-create worktree on resume")?;

        let session_name = self.session_name(&instance.title);
        // §4.1 failure semantics: a multiplexer error on Resume is retried
        // once, always re-passing the worktree directory explicitly (never
        // falling back to an empty/ambient workdir).
        if let Err(first_err) = self.mux.restore(&session_name, &worktree_path, &instance.program) {
            warn!(title = %instance.title, error = %first_err, "resume: multiplexer restore failed, retrying once");
            self.mux
                .restore(&session_name, &worktree_path, &instance.program)
                .context("failed to restart multiplexer session on resume (after retry)")?;
        }

        instance.worktree = Some(WorktreeHandle {
            repo_path: self.repo_path.clone(),
            worktree_path: worktree_path.clone(),
            session_name,
            branch_name: instance.branch.clone(),
            base_commit_sha: base_commit,
        });
        instance.path = worktree_path.clone();
        instance.working_dir = worktree_path;
        instance.status = Status::Ready;
        instance.updated_at = now_unix();
        info!(title = %instance.title, "lifecycle: resumed");
        Ok(())
    }

    /// §4.1 `Kill`: close the multiplexer if any, remove worktree and
    /// branch. Fails if the branch is checked out elsewhere.
    pub fn kill(&self, instance: &mut Instance) -> Result<()> {
        if let Some(worktree) = &instance.worktree {
            let elsewhere = git::list_worktrees(&self.repo_path)?
                .into_iter()
                .any(|e| e.branch == instance.branch && e.path != worktree.worktree_path);
            if elsewhere {
                return Err(LifecycleError::BranchCheckedOutElsewhere(instance.branch.clone()).into());
            }
            let _ = self.mux.close(&worktree.session_name);
            git::cleanup(&self.repo_path, &worktree.worktree_path, &instance.branch)
                .context("failed to clean up worktree on kill")?;
        } else {
            let worktree_path = self.worktree_base_dir().join(&instance.title);
            let elsewhere = git::list_worktrees(&self.repo_path)?
                .into_iter()
                .any(|e| e.branch == instance.branch && e.path != worktree_path);
            if elsewhere {
                return Err(LifecycleError::BranchCheckedOutElsewhere(instance.branch.clone()).into());
            }
            let _ = git::cleanup(&self.repo_path, &worktree_path, &instance.branch);
        }
        instance.status = Status::Stopped;
        instance.updated_at = now_unix();
        info!(title = %instance.title, "lifecycle: killed");
        Ok(())
    }

    /// §4.1 `Attach`: hands the controlling terminal to the multiplexer
    /// session; blocks the UI thread until the user detaches (§5).
    pub fn attach(&self, instance: &Instance) -> Result<()> {
        let Some(worktree) = &instance.worktree else {
            return Err(LifecycleError::NotAttachable.into());
        };
        if matches!(instance.status, Status::Paused) {
            return Err(LifecycleError::NotAttachable.into());
        }
        self.mux.attach(&worktree.session_name)
    }

    pub fn send_prompt(&self, instance: &Instance, text: &str) -> Result<()> {
        let Some(worktree) = &instance.worktree else {
            return Err(anyhow!("instance '{}' is not started", instance.title));
        };
        self.mux.send_keys(&worktree.session_name, text)?;
        self.mux.tap_enter(&worktree.session_name)
    }

    pub fn tap_enter(&self, instance: &Instance) -> Result<()> {
        let Some(worktree) = &instance.worktree else {
            return Err(anyhow!("instance '{}' is not started", instance.title));
        };
        self.mux.tap_enter(&worktree.session_name)
    }

    /// §4.1 `UpdateDiffStats`: refresh the Diff Snapshot. If the worktree
    /// path has vanished, the instance is auto-paused and the snapshot
    /// cleared.
    pub fn update_diff_stats(&self, instance: &mut Instance) -> Result<()> {
        let Some(worktree) = instance.worktree.clone() else {
            return Ok(());
        };
        match git::diff_against_base(&worktree.worktree_path, &worktree.base_commit_sha) {
            Ok(diff) => {
                instance.diff_stats.added = diff.added;
                instance.diff_stats.removed = diff.removed;
                instance.diff_stats.content = diff.content;
                instance.diff_stats.last_error = None;
            }
            Err(e) => {
                if e.downcast_ref::<git::WorktreeError>()
                    .is_some_and(|w| matches!(w, git::WorktreeError::PathMissing(_)))
                {
                    warn!(title = %instance.title, "worktree vanished, auto-pausing");
                    instance.worktree = None;
                    instance.status = Status::Paused;
                    instance.diff_stats = Default::default();
                } else {
                    instance.diff_stats.last_error = Some(e.to_string());
                }
            }
        }
        Ok(())
    }

    /// §4.1 `HasUpdated`: returns `(output_changed, prompt_detected)`.
    pub fn has_updated(&self, instance: &Instance, snapshot: &mut OutputSnapshot) -> (bool, bool) {
        let Some(worktree) = &instance.worktree else {
            return (false, false);
        };
        let Some(captured) = self.mux.capture_pane_content(&worktree.session_name, 2000) else {
            return (false, false);
        };
        let changed = captured != snapshot.last_captured;
        if changed {
            snapshot.generation += 1;
            snapshot.last_captured = captured.clone();
        }
        let prompt_detected = looks_like_prompt(&captured);
        (changed, prompt_detected)
    }

    /// §4.1 status derivation, run after each reconciliation tick for
    /// non-Paused started instances. Returns `true` if auto-confirm fired
    /// an Enter keypress.
    pub fn derive_status(&self, instance: &mut Instance, output_changed: bool, prompt_detected: bool) -> Result<bool> {
        if matches!(instance.status, Status::Paused | Status::Stopped) {
            return Ok(false);
        }
        instance.updated_at = now_unix();
        if output_changed {
            instance.status = Status::Running;
            return Ok(false);
        }
        if prompt_detected {
            if instance.auto_yes {
                self.tap_enter(instance)?;
                instance.status = Status::Ready;
                return Ok(true);
            }
            instance.status = Status::NeedsApproval;
            return Ok(false);
        }
        instance.status = Status::Ready;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_length_boundaries() {
        assert!(validate_title("").is_err());
        assert!(validate_title(&"a".repeat(32)).is_ok());
        assert!(validate_title(&"a".repeat(33)).is_err());
    }

    #[test]
    fn instance_limit_boundary() {
        assert!(validate_instance_count(99).is_ok());
        assert!(validate_instance_count(100).is_err());
    }

    #[test]
    fn branch_name_is_slugified() {
        assert_eq!(derive_branch_name("Fix Auth Bug!"), "workloom/fix-auth-bug");
        assert_eq!(derive_branch_name("  spaced  "), "workloom/spaced");
    }

    #[test]
    fn prompt_heuristic_matches_common_markers() {
        assert!(looks_like_prompt("Do you want to proceed? (y/n)"));
        assert!(looks_like_prompt("waiting for your confirmation"));
        assert!(!looks_like_prompt("compiling... 42% done"));
    }
}
