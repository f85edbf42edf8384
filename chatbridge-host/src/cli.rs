//! Command-line argument parsing for the headless front end
//!
//! Uses clap for argument parsing with derive macros.

use std::path::PathBuf;

use clap::Parser;

use chatbridge_host::Layout;
use chatbridge_utils::LogConfig;

/// chatbridge - drive the chat server and client from a terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file path
    ///
    /// Defaults to `config.toml` in the chatbridge config directory.
    #[arg(long, short = 'c', env = "CHATBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print UI updates as JSON lines instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Executable layout (auto, dev or packaged), overriding the config file
    #[arg(long)]
    pub layout: Option<Layout>,

    /// Write logs to the log file instead of stderr
    #[arg(long, default_value_t = false)]
    pub log_file: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn log_config(&self) -> LogConfig {
        if self.log_file {
            LogConfig::desktop()
        } else {
            LogConfig::headless()
        }
    }
}
