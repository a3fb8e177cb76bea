//! Multiplexer controller: spawns, restores, and queries detached terminal
//! sessions that run an agent program.
//!
//! One external multiplexer session backs exactly one [`crate::lifecycle`]
//! instance (never a shared window/pane inside one big session); the
//! session's full name is `<prefix><title>`. The controller never guesses at
//! a working directory: every operation that materializes a session takes one
//! explicitly.

pub mod tmux;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

pub use tmux::TmuxBackend;

/// Snapshot of a live session's process, used by the reconciliation loop's
/// health check to tell "started but gone" apart from "just quiet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePaneInfo {
    pub pid: Option<u32>,
    pub current_command: Option<String>,
}

/// Abstraction over an external terminal multiplexer (e.g. `tmux`).
///
/// Implementations must be `Send + Sync` so a single controller can be
/// shared (`Arc<dyn MultiplexerController>`) across the lifecycle engine and
/// the reconciliation loop.
pub trait MultiplexerController: Send + Sync {
    /// Name of this backend, e.g. `"tmux"`.
    fn name(&self) -> &'static str;

    /// Create a new detached session bound to `work_dir`, running `program`.
    /// Failure is surfaced to the caller (§4.1 Start).
    fn start(&self, full_name: &str, work_dir: &Path, program: &str) -> Result<()>;

    /// If a session named `full_name` exists externally, this is a no-op
    /// (the session is left attached-or-not as it was). Otherwise spawns a
    /// new detached session re-running `program`.
    ///
    /// `work_dir` is the authoritative working directory for the respawned
    /// session. An empty `work_dir` falls back to the process's current
    /// directory, but the lifecycle engine's restore path must always pass
    /// the worktree directory; running the wrong directory here was a real
    /// historical bug and is locked in by a test.
    fn restore(&self, full_name: &str, work_dir: &Path, program: &str) -> Result<()>;

    /// Hand the controlling terminal to the session; returns once the user
    /// detaches (or the session ends).
    fn attach(&self, full_name: &str) -> Result<()>;

    /// Kill the external session outright.
    fn close(&self, full_name: &str) -> Result<()>;

    /// Probe whether a session with this name currently exists.
    fn does_session_exist(&self, full_name: &str) -> Result<bool>;

    /// Snapshot of visible + scrollback content, as text. `None` if the
    /// session does not exist or the capture failed transiently.
    fn capture_pane_content(&self, full_name: &str, lines: u16) -> Option<String>;

    /// Send literal text to the session's input. Never injects an Enter;
    /// callers that want one call [`MultiplexerController::tap_enter`]
    /// afterwards.
    fn send_keys(&self, full_name: &str, text: &str) -> Result<()>;

    /// Send a bare Enter keypress.
    fn tap_enter(&self, full_name: &str) -> Result<()>;

    /// Resize the session for non-attached rendering.
    fn set_detached_size(&self, full_name: &str, width: u16, height: u16) -> Result<()>;

    /// Best-effort liveness/PID info for the reconciliation loop. `None` if
    /// unsupported or the session has no resolvable live process.
    fn get_live_pane_info(&self, full_name: &str) -> Result<Option<LivePaneInfo>> {
        let _ = full_name;
        Ok(None)
    }

    /// Block until the named session is no longer reported by the server.
    /// Used by tests and by `Kill` when a caller wants a synchronous return.
    fn wait_until_closed(&self, full_name: &str, timeout: Duration) -> Result<()>;
}

/// Compose a session's full external name from the configured prefix and the
/// instance's title. Centralized so every call site agrees (§3: "derived
/// session name (fixed prefix + instance title)").
pub fn session_name(prefix: &str, title: &str) -> String {
    format!("{prefix}{title}")
}

/// Construct the controller for the one multiplexer backend the core spec
/// targets. Kept as a free function (rather than inlining `TmuxBackend::new`
/// at call sites) so a second backend could be added later without touching
/// callers.
pub fn create_controller() -> std::sync::Arc<dyn MultiplexerController> {
    std::sync::Arc::new(TmuxBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_name_joins_prefix_and_title() {
        assert_eq!(session_name("wl-", "fix-auth"), "wl-fix-auth");
    }

    #[test]
    fn session_name_with_empty_prefix_is_bare_title() {
        assert_eq!(session_name("", "fix-auth"), "fix-auth");
    }
}
