//! Worktree manager (§4.2): creation, cleanup, recovery of stale worktrees,
//! and the commit/push/diff flows that back a session instance's branch.
//!
//! Git itself is never reimplemented; every operation here shells out via
//! [`crate::cmd::Cmd`], matching the core spec's explicit non-goal of
//! reimplementing git from scratch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cmd::Cmd;

/// git-config key under which the recorded base commit for a branch is
/// stored, so `GetBaseCommit` survives process restarts.
const BASE_COMMIT_CONFIG_PREFIX: &str = "workloom-base";

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("worktree not found for '{0}'")]
    NotFound(String),
    #[error("repository has no commits yet; create an initial commit before starting a session")]
    NoHead,
    #[error("branch '{0}' is checked out in another worktree")]
    BranchCheckedOutElsewhere(String),
    #[error("worktree path {0} does not exist on disk")]
    PathMissing(PathBuf),
}

/// Unified-diff + numstat result for a worktree against its recorded base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub added: usize,
    pub removed: usize,
    pub content: String,
}

/// One (path, branch) pair as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeListEntry {
    pub path: PathBuf,
    pub branch: String,
}

pub fn is_git_repo_at(repo_path: &Path) -> Result<bool> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["rev-parse", "--git-dir"])
        .run_as_check()
}

pub fn has_commits(repo_path: &Path) -> Result<bool> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["rev-parse", "--verify", "HEAD"])
        .run_as_check()
}

pub fn get_head_commit(repo_path: &Path) -> Result<String> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["rev-parse", "HEAD"])
        .run_and_capture_stdout()
        .context("failed to resolve HEAD")
}

pub fn branch_exists(repo_path: &Path, branch: &str) -> Result<bool> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
        .run_as_check()
}

fn parse_worktree_list_porcelain(output: &str) -> Vec<WorktreeListEntry> {
    let mut entries = Vec::new();
    for block in output.trim().split("\n\n") {
        let mut path: Option<PathBuf> = None;
        let mut branch: Option<String> = None;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                branch = Some(b.to_string());
            } else if line.trim() == "detached" {
                branch = Some("(detached)".to_string());
            }
        }
        if let (Some(path), Some(branch)) = (path, branch) {
            entries.push(WorktreeListEntry { path, branch });
        }
    }
    entries
}

pub fn list_worktrees(repo_path: &Path) -> Result<Vec<WorktreeListEntry>> {
    let output = Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "list", "--porcelain"])
        .run_and_capture_stdout()
        .context("failed to list worktrees")?;
    Ok(parse_worktree_list_porcelain(&output))
}

/// §4.2 `IsBranchCheckedOut`: is `branch` the current HEAD of some worktree
/// in `repo_path` (including the main worktree itself)?
pub fn is_branch_checked_out(repo_path: &Path, branch: &str) -> Result<bool> {
    Ok(list_worktrees(repo_path)?
        .iter()
        .any(|entry| entry.branch == branch))
}

/// §4.2 Setup algorithm. Concurrently ensures the parent directory exists and
/// probes whether the branch already exists, then binds an existing branch or
/// creates a new one rooted at HEAD. A worktree already registered at the
/// target path for `branch` (the "adopted worktree" case) is bound to as-is;
/// any other pre-existing directory there is force-removed first. A
/// brand-new repository (no HEAD) is rejected.
pub fn setup(repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<String> {
    let repo_path = repo_path.to_path_buf();
    let worktree_path_probe = worktree_path.to_path_buf();
    let branch_probe = branch.to_string();

    let (ensure_parent, exists) = std::thread::scope(|scope| {
        let parent_handle = scope.spawn(|| -> Result<()> {
            if let Some(parent) = worktree_path_probe.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create worktrees directory {}", parent.display())
                })?;
            }
            Ok(())
        });
        let exists_handle = scope.spawn(|| branch_exists(&repo_path, &branch_probe));
        (
            parent_handle.join().unwrap_or_else(|_| Err(anyhow!("parent-dir setup panicked"))),
            exists_handle.join().unwrap_or_else(|_| Err(anyhow!("branch probe panicked"))),
        )
    });
    ensure_parent?;
    let branch_already_exists = exists?;

    if let Some(adopted_base) = adopt_if_registered(&repo_path, worktree_path, branch)? {
        return Ok(adopted_base);
    }

    if worktree_path.exists() {
        force_remove_worktree(repo_path.as_path(), worktree_path)?;
    }

    let path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow!("worktree path {} is not valid UTF-8", worktree_path.display()))?;

    if branch_already_exists {
        Cmd::new("git")
            .workdir(&repo_path)
            .args(&["worktree", "add", path_str, branch])
            .run()
            .with_context(|| format!("failed to bind worktree to existing branch {branch}"))?;
        get_base_commit(&repo_path, branch).or_else(|_| get_head_commit(&repo_path))
    } else {
        if !has_commits(&repo_path)? {
            return Err(WorktreeError::NoHead.into());
        }
        let base = get_head_commit(&repo_path)?;
        Cmd::new("git")
            .workdir(&repo_path)
            .args(&["worktree", "add", "-b", branch, path_str, &base])
            .run()
            .with_context(|| format!("failed to create worktree for new branch {branch}"))?;
        set_base_commit(&repo_path, branch, &base)?;
        Ok(base)
    }
}

/// If `worktree_path` is already registered (`git worktree list`) against
/// `branch`, it is a caller-supplied pre-existing worktree rather than one
/// this process is creating fresh; bind to it instead of tearing it down.
/// Registered against a different branch is a conflict, not something to
/// silently override.
fn adopt_if_registered(repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<Option<String>> {
    if !worktree_path.exists() {
        return Ok(None);
    }
    let registered = list_worktrees(repo_path)?;
    let Some(entry) = registered.iter().find(|e| e.path == worktree_path) else {
        return Ok(None);
    };
    if entry.branch != branch {
        return Err(anyhow!(
            "worktree at {} is already registered on branch '{}', not '{branch}'",
            worktree_path.display(),
            entry.branch
        ));
    }
    info!(path = %worktree_path.display(), branch = %branch, "setup: adopting existing worktree");
    let base = get_base_commit(repo_path, branch).or_else(|_| get_head_commit(repo_path))?;
    Ok(Some(base))
}

fn force_remove_worktree(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    let _ = Cmd::new("git")
        .workdir(repo_path)
        .args(&[
            "worktree",
            "remove",
            "--force",
            &worktree_path.to_string_lossy(),
        ])
        .run();
    if worktree_path.exists() {
        std::fs::remove_dir_all(worktree_path).with_context(|| {
            format!("failed to force-remove stale worktree at {}", worktree_path.display())
        })?;
    }
    Ok(())
}

/// §4.2 `Prune`: ask git to drop administrative state for worktrees whose
/// directory is gone. Never fails the caller's operation.
pub fn prune(repo_path: &Path) {
    let _ = Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "prune"])
        .run();
}

/// §4.2 Cleanup algorithm: `Prune`, attempt `remove --force`; if the
/// directory is already gone, manually sweep administrative state; prune
/// again; then delete the branch ref. Manual cleanup never fails the
/// operation: ghost worktrees are always considered gone.
pub fn cleanup(repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<()> {
    prune(repo_path);

    let remove_result = Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "remove", "--force", &worktree_path.to_string_lossy()])
        .run();

    if remove_result.is_err() && !worktree_path.exists() {
        manual_cleanup(repo_path, worktree_path)?;
    }

    prune(repo_path);

    if branch_exists(repo_path, branch)? {
        Cmd::new("git")
            .workdir(repo_path)
            .args(&["branch", "-D", branch])
            .run()
            .with_context(|| format!("failed to delete branch {branch}"))?;
    }
    unset_base_commit(repo_path, branch);
    Ok(())
}

/// §4.2 Remove: like Cleanup but keeps the branch ref.
pub fn remove_keep_branch(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    prune(repo_path);

    let remove_result = Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "remove", "--force", &worktree_path.to_string_lossy()])
        .run();

    if remove_result.is_err() && !worktree_path.exists() {
        manual_cleanup(repo_path, worktree_path)?;
    }

    prune(repo_path);
    Ok(())
}

fn git_common_dir(repo_path: &Path) -> Result<PathBuf> {
    let out = Cmd::new("git")
        .workdir(repo_path)
        .args(&["rev-parse", "--git-common-dir"])
        .run_and_capture_stdout()
        .context("failed to resolve git common dir")?;
    let p = PathBuf::from(out);
    if p.is_absolute() {
        Ok(p)
    } else {
        Ok(repo_path.join(p))
    }
}

/// Delete the administrative sub-directory under `.git/worktrees/<basename>`
/// for a worktree whose directory has already vanished on disk, plus any
/// sibling administrative directories that share the same basename (a
/// worktree re-created at the same path after an external `rm -rf` can leave
/// more than one stale entry).
fn manual_cleanup(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    let Some(basename) = worktree_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(());
    };
    let common_dir = match git_common_dir(repo_path) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "manual cleanup: could not resolve git common dir, skipping");
            return Ok(());
        }
    };
    let worktrees_admin_dir = common_dir.join("worktrees");
    let Ok(entries) = std::fs::read_dir(&worktrees_admin_dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy() == basename {
            let _ = std::fs::remove_dir_all(entry.path());
            debug!(dir = %entry.path().display(), "manual cleanup: removed ghost admin dir");
        }
    }
    Ok(())
}

/// §4.2 Commit/Push contract: stage all, commit (no-op if nothing to
/// commit), push.
pub fn commit_all(worktree_path: &Path, message: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree_path)
        .args(&["add", "-A"])
        .run()
        .context("failed to stage changes")?;

    let nothing_to_commit = Cmd::new("git")
        .workdir(worktree_path)
        .args(&["diff", "--cached", "--quiet"])
        .run_as_check()?;
    if nothing_to_commit {
        debug!(path = %worktree_path.display(), "commit_all: nothing to commit");
        return Ok(());
    }

    Cmd::new("git")
        .workdir(worktree_path)
        .args(&["commit", "-m", message])
        .run()
        .context("failed to commit")?;
    info!(path = %worktree_path.display(), "commit_all: committed");
    Ok(())
}

pub fn push(worktree_path: &Path, branch: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree_path)
        .args(&["push", "-u", "origin", branch])
        .run()
        .with_context(|| format!("failed to push branch {branch}"))?;
    Ok(())
}

/// §4.2 Diff contract: unified diff + numstat against the recorded base
/// commit. `Err(WorktreeError::PathMissing)` if the worktree path is gone;
/// callers use this to distinguish "transition to Paused" from other errors.
pub fn diff_against_base(worktree_path: &Path, base_commit: &str) -> Result<DiffResult> {
    if !worktree_path.exists() {
        return Err(WorktreeError::PathMissing(worktree_path.to_path_buf()).into());
    }

    let numstat = Cmd::new("git")
        .workdir(worktree_path)
        .args(&["diff", "--numstat", base_commit, "--"])
        .run_and_capture_stdout()
        .context("failed to compute diff numstat")?;

    let mut added = 0usize;
    let mut removed = 0usize;
    for line in numstat.lines() {
        let mut fields = line.split_whitespace();
        if let (Some(a), Some(r)) = (fields.next(), fields.next()) {
            added += a.parse::<usize>().unwrap_or(0);
            removed += r.parse::<usize>().unwrap_or(0);
        }
    }

    let content = Cmd::new("git")
        .workdir(worktree_path)
        .args(&["diff", base_commit, "--"])
        .run_and_capture_stdout()
        .unwrap_or_default();

    Ok(DiffResult {
        added,
        removed,
        content,
    })
}

fn set_base_commit(repo_path: &Path, branch: &str, commit: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&[
            "config",
            "--local",
            &format!("{BASE_COMMIT_CONFIG_PREFIX}.{branch}"),
            commit,
        ])
        .run()
        .with_context(|| format!("failed to record base commit for {branch}"))?;
    Ok(())
}

/// §4.2 `GetBaseCommit`.
pub fn get_base_commit(repo_path: &Path, branch: &str) -> Result<String> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&[
            "config",
            "--local",
            "--get",
            &format!("{BASE_COMMIT_CONFIG_PREFIX}.{branch}"),
        ])
        .run_and_capture_stdout()
        .with_context(|| format!("no recorded base commit for branch {branch}"))
}

fn unset_base_commit(repo_path: &Path, branch: &str) {
    let _ = Cmd::new("git")
        .workdir(repo_path)
        .args(&[
            "config",
            "--local",
            "--unset",
            &format!("{BASE_COMMIT_CONFIG_PREFIX}.{branch}"),
        ])
        .run();
}

pub fn has_uncommitted_changes(worktree_path: &Path) -> Result<bool> {
    let status = Cmd::new("git")
        .workdir(worktree_path)
        .args(&["status", "--porcelain"])
        .run_and_capture_stdout()
        .context("failed to check worktree status")?;
    Ok(!status.trim().is_empty())
}

/// All branches currently checked out anywhere in the repository, used by
/// the lifecycle engine to pick a branch name that doesn't collide (§3
/// invariant: no two live instances share a branch).
pub fn checked_out_branches(repo_path: &Path) -> Result<HashSet<String>> {
    Ok(list_worktrees(repo_path)?
        .into_iter()
        .map(|e| e.branch)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            assert!(
                Command::new("git")
                    .current_dir(dir.path())
                    .args(args)
                    .status()
                    .unwrap()
                    .success()
            );
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[test]
    fn parse_porcelain_handles_branch_and_detached() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n\
                       worktree /repo/worktrees/t1\nHEAD def456\ndetached\n";
        let entries = parse_worktree_list_porcelain(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].branch, "main");
        assert_eq!(entries[1].branch, "(detached)");
    }

    #[test]
    fn setup_creates_new_branch_rooted_at_head() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        let base = setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        assert!(worktree_path.join("a.txt").exists());
        assert_eq!(base, get_head_commit(repo.path()).unwrap());
        assert_eq!(get_base_commit(repo.path(), "wl/t1").unwrap(), base);
    }

    #[test]
    fn setup_on_repo_without_commits_fails() {
        let dir = TempDir::new().unwrap();
        assert!(
            Command::new("git")
                .current_dir(dir.path())
                .args(["init", "-q"])
                .status()
                .unwrap()
                .success()
        );
        let worktree_path = dir.path().join("worktrees").join("t1");
        let err = setup(dir.path(), &worktree_path, "wl/t1").unwrap_err();
        assert!(err.downcast_ref::<WorktreeError>().is_some() || err.to_string().contains("HEAD"));
    }

    #[test]
    fn setup_then_cleanup_leaves_no_directory_or_branch() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        cleanup(repo.path(), &worktree_path, "wl/t1").unwrap();
        assert!(!worktree_path.exists());
        assert!(!branch_exists(repo.path(), "wl/t1").unwrap());
    }

    #[test]
    fn setup_then_remove_keeps_branch_but_not_directory() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        remove_keep_branch(repo.path(), &worktree_path).unwrap();
        assert!(!worktree_path.exists());
        assert!(branch_exists(repo.path(), "wl/t1").unwrap());
    }

    #[test]
    fn setup_adopts_worktree_already_registered_on_the_same_branch() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        let first_base = setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        std::fs::write(worktree_path.join("marker.txt"), "kept\n").unwrap();

        let second_base = setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        assert_eq!(second_base, first_base);
        assert!(worktree_path.join("marker.txt").exists());
    }

    #[test]
    fn setup_rejects_worktree_registered_on_a_different_branch() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        setup(repo.path(), &worktree_path, "wl/t1").unwrap();

        let err = setup(repo.path(), &worktree_path, "wl/other").unwrap_err();
        assert!(err.to_string().contains("wl/t1"));
        assert!(worktree_path.exists());
    }

    #[test]
    fn cleanup_tolerates_externally_deleted_directory() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        std::fs::remove_dir_all(&worktree_path).unwrap();
        // Ghost worktree: directory gone but admin metadata remains.
        cleanup(repo.path(), &worktree_path, "wl/t1").unwrap();
        assert!(!branch_exists(repo.path(), "wl/t1").unwrap());
    }

    #[test]
    fn diff_against_base_reports_added_and_removed_lines() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        let base = setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        std::fs::write(worktree_path.join("a.txt"), "hello\nworld\n").unwrap();
        commit_all(&worktree_path, "add world").unwrap();
        let diff = diff_against_base(&worktree_path, &base).unwrap();
        assert_eq!(diff.added, 1);
        assert_eq!(diff.removed, 0);
    }

    #[test]
    fn diff_against_missing_path_is_distinct_error() {
        let err = diff_against_base(Path::new("/nonexistent/workloom-test-path"), "HEAD").unwrap_err();
        assert!(err.downcast_ref::<WorktreeError>().is_some());
    }

    #[test]
    fn commit_all_is_a_no_op_when_nothing_changed() {
        let repo = init_repo();
        let worktree_path = repo.path().join("worktrees").join("t1");
        setup(repo.path(), &worktree_path, "wl/t1").unwrap();
        commit_all(&worktree_path, "should be a no-op").unwrap();
        let log = Cmd::new("git")
            .workdir(&worktree_path)
            .args(&["log", "--oneline"])
            .run_and_capture_stdout()
            .unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn is_branch_checked_out_detects_main_worktree() {
        let repo = init_repo();
        assert!(is_branch_checked_out(repo.path(), "main").unwrap());
        assert!(!is_branch_checked_out(repo.path(), "does-not-exist").unwrap());
    }
}
