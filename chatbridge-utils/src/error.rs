//! Error types for chatbridge
//!
//! Provides a unified error type used across all chatbridge crates, plus the
//! category taxonomy the session layer records diagnostics under.

use std::path::PathBuf;

/// Main error type for chatbridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Process Errors ===

    #[error("{role} executable not found: {path}")]
    ExecutableNotFound { role: String, path: PathBuf },

    #[error("{role} executable location still unavailable after {attempts} attempts")]
    ExecutableNotReady { role: String, attempts: u32 },

    #[error("Failed to spawn {role}: {source}")]
    SpawnFailure {
        role: String,
        source: std::io::Error,
    },

    #[error("{role} is already running")]
    AlreadyRunning { role: String },

    #[error("{role} exited abnormally (code {code:?}, signal {signal:?})")]
    ProcessExitAbnormal {
        role: String,
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("{role} did not exit within {grace_ms}ms of the termination request")]
    TerminationTimeout { role: String, grace_ms: u64 },

    // === Protocol Errors ===

    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("Protocol violation: {event} is not valid while {state}")]
    ProtocolViolation { event: String, state: String },

    #[error("Not connected")]
    NotConnected,

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy used for diagnostics and notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ExecutableNotFound,
    SpawnFailure,
    ProtocolDecodeError,
    ProtocolViolation,
    ProcessExitAbnormal,
    TerminationTimeout,
    Other,
}

impl BridgeError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::ProtocolDecode(msg.into())
    }

    /// Create a protocol violation error
    pub fn violation(event: impl Into<String>, state: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            event: event.into(),
            state: state.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Taxonomy bucket for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ExecutableNotFound { .. } | Self::ExecutableNotReady { .. } => {
                ErrorCategory::ExecutableNotFound
            }
            Self::SpawnFailure { .. } => ErrorCategory::SpawnFailure,
            Self::ProtocolDecode(_) => ErrorCategory::ProtocolDecodeError,
            Self::ProtocolViolation { .. } => ErrorCategory::ProtocolViolation,
            Self::ProcessExitAbnormal { .. } => ErrorCategory::ProcessExitAbnormal,
            Self::TerminationTimeout { .. } => ErrorCategory::TerminationTimeout,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error interrupts the user-visible flow with a blocking notice
    pub fn is_blocking(&self) -> bool {
        self.category() == ErrorCategory::ExecutableNotFound
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
