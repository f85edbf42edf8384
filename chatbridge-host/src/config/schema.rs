//! Configuration schema structs

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable that selects the dev layout under `layout = "auto"`
pub const ENV_MODE_VAR: &str = "CHATBRIDGE_ENV";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binaries: BinariesConfig,
    pub server: ServerConfig,
    pub supervisor: SupervisorConfig,
    pub session: SessionConfig,
}

/// Where the server and client executables live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `dev` when `CHATBRIDGE_ENV=development`, otherwise `packaged`
    #[default]
    Auto,
    /// `<dev_root>/bin/<name>`
    Dev,
    /// `<resources>/app/bin/<name>`
    Packaged,
}

impl Layout {
    /// Resolve `Auto` against the environment; other layouts are returned as-is
    pub fn resolve(self) -> Layout {
        match self {
            Layout::Auto => {
                let mode = std::env::var(ENV_MODE_VAR).unwrap_or_default();
                if mode.eq_ignore_ascii_case("development") {
                    Layout::Dev
                } else {
                    Layout::Packaged
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Auto => f.write_str("auto"),
            Layout::Dev => f.write_str("dev"),
            Layout::Packaged => f.write_str("packaged"),
        }
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Layout::Auto),
            "dev" | "development" => Ok(Layout::Dev),
            "packaged" | "production" => Ok(Layout::Packaged),
            other => Err(format!(
                "unknown layout '{}' (expected auto, dev or packaged)",
                other
            )),
        }
    }
}

/// Executable discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    pub layout: Layout,
    /// Project root used by the dev layout
    pub dev_root: PathBuf,
    /// Environment variable naming the packaged resources directory
    pub resources_env: String,
    pub server_name: String,
    pub client_name: String,
    /// Extra environment passed to both executables
    pub env: HashMap<String, String>,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        let mut env = HashMap::new();
        env.insert("LANG".to_string(), "ru_RU.UTF-8".to_string());

        Self {
            layout: Layout::Auto,
            dev_root: PathBuf::from("."),
            resources_env: "CHATBRIDGE_RESOURCES".to_string(),
            server_name: "server".to_string(),
            client_name: "client".to_string(),
            env,
        }
    }
}

/// Local chat server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Ports the server binds (chat, voice)
    pub ports: Vec<u16>,
    /// Terminate whatever holds `ports` before starting the server
    pub reclaim_ports: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ports: vec![6000, 6001],
            reclaim_ports: true,
        }
    }
}

/// Process supervision timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long `stop` waits for the exit event before force-clearing (default: 2000)
    pub grace_period_ms: u64,
    /// Delay between executable location attempts (default: 250)
    pub locate_retry_interval_ms: u64,
    /// Location attempts before giving up (default: 20)
    pub locate_retry_attempts: u32,
    /// How long the exit report waits for trailing output (default: 500)
    pub drain_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2000,
            locate_retry_interval_ms: 250,
            locate_retry_attempts: 20,
            drain_timeout_ms: 500,
        }
    }
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn locate_retry_interval(&self) -> Duration {
        Duration::from_millis(self.locate_retry_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address used when a login intent leaves it blank
    pub default_server_address: String,
    /// Diagnostics kept before the oldest are dropped
    pub diagnostics_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_server_address: "127.0.0.1".to_string(),
            diagnostics_capacity: 256,
        }
    }
}
