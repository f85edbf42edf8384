//! Subprocess supervision for the server and client executables
//!
//! Children run with piped stdio in their own process group. Platform
//! specifics (tree termination, port lookup) sit behind the [`TreeKiller`]
//! and [`PortReclaimer`] traits.

mod handle;
mod io;
mod launch;
mod ports;
mod supervisor;
mod tree;

pub use handle::{ExitInfo, ProcessHandle, ProcessState};
pub use launch::{BinaryLocator, LaunchSpec, LayoutLocator, Locate};
pub use ports::{parse_lsof_pids, parse_netstat_pids, PortReclaimer, SystemPortReclaimer};
pub use supervisor::{
    ProcessEvent, ProcessSupervisor, SpawnedChild, StopOutcome, SupervisorEvent,
    SupervisorSettings,
};
pub use tree::{PlatformTreeKiller, TreeKiller};
