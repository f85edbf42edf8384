//! chatbridge-host: supervises the chat server and client executables and
//! bridges their text protocol to a front end
//!
//! - [`process`] spawns, watches and terminates the two subprocesses
//! - [`session`] holds login state, roster, chat log and diagnostics
//! - [`bridge`] runs the single loop that ties them together
//! - [`ui`] is what the loop reports outward

pub mod bridge;
pub mod command;
pub mod config;
pub mod process;
pub mod session;
pub mod ui;

pub use bridge::{Bridge, BridgeHandle, Intent};
pub use command::{Command, CommandChannel};
pub use config::{AppConfig, ConfigLoader, Layout};
pub use ui::{NoticeLevel, UiUpdate};
