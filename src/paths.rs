//! XDG-style locations for state, config and shipped assets.
//!
//! State lives under `$XDG_STATE_HOME/run-claude` (fallback `~/.local/state/run-claude`),
//! user config under `$XDG_CONFIG_HOME/run-claude` (fallback `~/.config/run-claude`).

use std::env;
use std::path::PathBuf;

pub const STATE_FILE_NAME: &str = "state.json";
pub const LOCK_FILE_NAME: &str = "state.lock";
pub const PID_FILE_NAME: &str = "proxy.pid";
pub const LOG_FILE_NAME: &str = "proxy.log";
pub const LITELLM_CONFIG_FILE_NAME: &str = "litellm_config.yaml";

fn home_or_tmp() -> PathBuf {
    home::home_dir().unwrap_or_else(env::temp_dir)
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

pub fn state_dir() -> PathBuf {
    let base = non_empty_env("XDG_STATE_HOME")
        .unwrap_or_else(|| home_or_tmp().join(".local").join("state"));
    base.join("run-claude")
}

pub fn state_file() -> PathBuf {
    state_dir().join(STATE_FILE_NAME)
}

pub fn lock_file() -> PathBuf {
    state_dir().join(LOCK_FILE_NAME)
}

pub fn pid_file() -> PathBuf {
    state_dir().join(PID_FILE_NAME)
}

pub fn log_file() -> PathBuf {
    state_dir().join(LOG_FILE_NAME)
}

pub fn litellm_config_file() -> PathBuf {
    state_dir().join(LITELLM_CONFIG_FILE_NAME)
}

pub fn config_dir() -> PathBuf {
    let base =
        non_empty_env("XDG_CONFIG_HOME").unwrap_or_else(|| home_or_tmp().join(".config"));
    base.join("run-claude")
}

/// Directory holding secrets and the compose `.env`: `$RUN_CLAUDE_HOME` or the config dir.
pub fn secrets_home() -> PathBuf {
    non_empty_env("RUN_CLAUDE_HOME").unwrap_or_else(config_dir)
}

/// Directory of shipped `profiles.yaml` / `models.yaml`.
/// Order: `$RUN_CLAUDE_BUILTIN_DIR`, `<exe>/../share/run-claude`, `<exe dir>`.
pub fn builtin_dir() -> PathBuf {
    if let Some(p) = non_empty_env("RUN_CLAUDE_BUILTIN_DIR") {
        return p;
    }
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()));
    if let Some(dir) = exe_dir {
        let share = dir.join("..").join("share").join("run-claude");
        if share.is_dir() {
            return share;
        }
        return dir;
    }
    PathBuf::from(".")
}

pub fn compose_file() -> PathBuf {
    non_empty_env("RUN_CLAUDE_COMPOSE_FILE")
        .unwrap_or_else(|| config_dir().join("docker-compose.yaml"))
}
