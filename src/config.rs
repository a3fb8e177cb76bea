//! Configuration loading (§0.3, §6). A single `config.json` under the
//! home-relative configuration directory; missing file falls back to
//! defaults, a malformed file is a startup error (taxonomy class 1, §7).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

const APP_DIR_NAME: &str = "workloom";
const DEFAULT_PROGRAM: &str = "claude";
const DEFAULT_TMUX_PREFIX: &str = "wl-";
const DEFAULT_SESSION_DETECTION_INTERVAL_MS: u64 = 3_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Shared process-wide defaults, passed into the lifecycle engine at
/// construction rather than read as globals (§9 Design Notes).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_program")]
    pub default_program: String,

    #[serde(default = "default_tmux_prefix")]
    pub tmux_session_prefix: String,

    #[serde(default = "default_detect_new_sessions")]
    pub detect_new_sessions: bool,

    #[serde(default = "default_session_detection_interval_ms")]
    pub session_detection_interval_ms: u64,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_tmux_prefix() -> String {
    DEFAULT_TMUX_PREFIX.to_string()
}

fn default_detect_new_sessions() -> bool {
    true
}

fn default_session_detection_interval_ms() -> u64 {
    DEFAULT_SESSION_DETECTION_INTERVAL_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_program: default_program(),
            tmux_session_prefix: default_tmux_prefix(),
            detect_new_sessions: default_detect_new_sessions(),
            session_detection_interval_ms: default_session_detection_interval_ms(),
            log: LogConfig::default(),
        }
    }
}

/// `$XDG_CONFIG_HOME/workloom`, falling back to `~/.config/workloom`.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join(APP_DIR_NAME));
    }
    let home = home::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".config").join(APP_DIR_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// `$XDG_STATE_HOME/workloom`, falling back to `~/.local/state/workloom`.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join(APP_DIR_NAME));
    }
    let home = home::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".local").join("state").join(APP_DIR_NAME))
}

impl Config {
    /// Missing file is not an error (falls back to built-in defaults);
    /// a present-but-malformed file is a startup error.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("malformed config file at {}", path.display()))
    }

    /// Resolve `default_program` (or a CLI override) to an executable on
    /// `PATH`, so a typo surfaces immediately rather than inside tmux.
    pub fn resolve_program(&self, override_program: Option<&str>) -> Result<String> {
        let program = override_program.unwrap_or(&self.default_program);
        which::which(program)
            .map(|_| program.to_string())
            .with_context(|| format!("program '{program}' was not found on PATH"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.default_program, DEFAULT_PROGRAM);
        assert_eq!(config.tmux_session_prefix, DEFAULT_TMUX_PREFIX);
        assert!(config.detect_new_sessions);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"default_program": "codex"}"#).unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.default_program, "codex");
        assert_eq!(config.tmux_session_prefix, DEFAULT_TMUX_PREFIX);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.default_program, DEFAULT_PROGRAM);
    }
}
