//! Configuration for the bridge
//!
//! Loaded once at startup from `$XDG_CONFIG_HOME/chatbridge/config.toml`
//! (or `--config`); every section falls back to defaults when absent.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AppConfig, BinariesConfig, Layout, ServerConfig, SessionConfig, SupervisorConfig,
    ENV_MODE_VAR,
};
