//! Per-role process handle

use std::process::ExitStatus;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chatbridge_protocol::Role;

/// How a process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
    /// Terminating signal (unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Exit code 0
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Lifecycle of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Start accepted; locating, reclaiming ports or spawning
    Starting,
    Running,
    /// Exit observed, or the spawn failed (then `pid` is `None`)
    Exited(ExitInfo),
    /// Stopped before it finished starting, or force-cleared after the grace period
    Killed,
}

impl ProcessState {
    /// Starting or Running
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }
}

/// The supervisor's record of one process
///
/// The pipes themselves belong to the reader and writer tasks; the handle
/// keeps the sending half of the stdin queue and a token that stops those
/// tasks once the process is gone.
#[derive(Debug)]
pub struct ProcessHandle {
    pub(crate) role: Role,
    pub(crate) generation: u64,
    pub(crate) state: ProcessState,
    pub(crate) pid: Option<u32>,
    pub(crate) input: Option<mpsc::UnboundedSender<String>>,
    pub(crate) stop_requested: bool,
    pub(crate) failure: Option<String>,
    pub(crate) cancel: CancellationToken,
}

impl ProcessHandle {
    pub(crate) fn starting(role: Role, generation: u64, cancel: CancellationToken) -> Self {
        Self {
            role,
            generation,
            state: ProcessState::Starting,
            pid: None,
            input: None,
            stop_requested: false,
            failure: None,
            cancel,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Distinguishes successive processes of the same role
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Spawn failure message, if the process never started
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Input queue, present only while Running with stdin open
    pub fn input(&self) -> Option<&mpsc::UnboundedSender<String>> {
        match self.state {
            ProcessState::Running => self.input.as_ref().filter(|tx| !tx.is_closed()),
            _ => None,
        }
    }

    /// Move to a terminal state and release the pipes
    pub(crate) fn finish(&mut self, state: ProcessState) {
        self.state = state;
        self.input = None;
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::with_code(3).to_string(), "exit code 3");
        assert_eq!(
            ExitInfo {
                code: None,
                signal: Some(15)
            }
            .to_string(),
            "signal 15"
        );
        assert_eq!(ExitInfo::default().to_string(), "unknown exit status");
    }

    #[test]
    fn test_exit_info_success() {
        assert!(ExitInfo::with_code(0).is_success());
        assert!(!ExitInfo::with_code(1).is_success());
        assert!(!ExitInfo::default().is_success());
    }

    #[test]
    fn test_live_states() {
        assert!(ProcessState::Starting.is_live());
        assert!(ProcessState::Running.is_live());
        assert!(!ProcessState::Killed.is_live());
        assert!(!ProcessState::Exited(ExitInfo::with_code(0)).is_live());
    }

    #[test]
    fn test_input_only_while_running() {
        let mut handle = ProcessHandle::starting(Role::Client, 1, CancellationToken::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        handle.input = Some(tx);
        assert!(handle.input().is_none());

        handle.state = ProcessState::Running;
        assert!(handle.input().is_some());

        handle.finish(ProcessState::Exited(ExitInfo::with_code(0)));
        assert!(handle.input().is_none());
        assert!(handle.cancel.is_cancelled());
    }

    #[test]
    fn test_input_hidden_once_writer_gone() {
        let mut handle = ProcessHandle::starting(Role::Client, 1, CancellationToken::new());
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        handle.input = Some(tx);
        handle.state = ProcessState::Running;
        drop(rx);
        assert!(handle.input().is_none());
    }
}
