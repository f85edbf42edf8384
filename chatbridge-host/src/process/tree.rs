//! Process-tree termination
//!
//! Children are spawned as leaders of their own process group on unix, so a
//! single `killpg` reaches every helper they fork. Windows has no process
//! groups in that sense; `taskkill /T` walks the tree instead.

use std::io;

use tracing::debug;

/// Requests termination of a process and everything it spawned
pub trait TreeKiller: Send + Sync {
    /// Ask the tree rooted at `pid` to terminate
    ///
    /// Returns once the request is issued; the exit itself is observed
    /// separately by the exit watcher.
    fn terminate_tree(&self, pid: u32) -> io::Result<()>;
}

/// Tree killer for the current platform
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformTreeKiller;

#[cfg(unix)]
impl TreeKiller for PlatformTreeKiller {
    fn terminate_tree(&self, pid: u32) -> io::Result<()> {
        let pgid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: killpg only reads its two integer arguments. The child was
        // spawned with process_group(0), so its pid is also its pgid.
        let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
        if rc == 0 {
            debug!(pid, "SIGTERM sent to process group");
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Group already gone
            debug!(pid, "process group not found");
            return Ok(());
        }
        Err(err)
    }
}

#[cfg(windows)]
impl TreeKiller for PlatformTreeKiller {
    fn terminate_tree(&self, pid: u32) -> io::Result<()> {
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;

        if status.success() {
            debug!(pid, "taskkill issued");
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("taskkill exited with {}", status),
            ))
        }
    }
}
