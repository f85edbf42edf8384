//! XDG locations for the config file and logs
//!
//! - config: `$XDG_CONFIG_HOME/chatbridge/config.toml`
//! - logs: `$XDG_STATE_HOME/chatbridge/log/`
//!
//! When no home directory can be determined, both fall back to
//! `$HOME` (or the temp dir) so startup never fails on path lookup.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const APP_NAME: &str = "chatbridge";
const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    parts.iter().fold(home, |path, part| path.join(part)).join(APP_NAME)
}

pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(&[".config"]))
}

pub fn config_file() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

/// Base for runtime state; `state_dir` is linux-only in `directories`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| home_fallback(&[".local", "state"]))
}

pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Create `path` and its parents if missing
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
