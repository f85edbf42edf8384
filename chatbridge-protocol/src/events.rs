//! Typed events decoded from subprocess output lines

use serde::{Deserialize, Serialize};

use crate::types::{PresenceStatus, RosterRecord};

/// One classified line of subprocess output
///
/// Produced only by [`crate::classify`]; consumers never build these from raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    LoginSuccess { user: String },
    LoginFailure { reason: String },
    SessionInvalidated { reason: String },
    StatusUpdate { user: String, status: PresenceStatus },
    UserListSnapshot { list: Vec<RosterRecord> },
    ChatLine { author: String, text: String },
    JoinNotice { user: String },
    LeaveNotice { user: String },
    VoiceJoined,
    VoiceLeft,
    ServerStarted { address: String },
    ServerShutdown { reason: String },
    GenericError { text: String },
    Unclassified { text: String },
}

impl ProtocolEvent {
    /// Variant name, used in logs and violation reports
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::LoginSuccess { .. } => "LoginSuccess",
            ProtocolEvent::LoginFailure { .. } => "LoginFailure",
            ProtocolEvent::SessionInvalidated { .. } => "SessionInvalidated",
            ProtocolEvent::StatusUpdate { .. } => "StatusUpdate",
            ProtocolEvent::UserListSnapshot { .. } => "UserListSnapshot",
            ProtocolEvent::ChatLine { .. } => "ChatLine",
            ProtocolEvent::JoinNotice { .. } => "JoinNotice",
            ProtocolEvent::LeaveNotice { .. } => "LeaveNotice",
            ProtocolEvent::VoiceJoined => "VoiceJoined",
            ProtocolEvent::VoiceLeft => "VoiceLeft",
            ProtocolEvent::ServerStarted { .. } => "ServerStarted",
            ProtocolEvent::ServerShutdown { .. } => "ServerShutdown",
            ProtocolEvent::GenericError { .. } => "GenericError",
            ProtocolEvent::Unclassified { .. } => "Unclassified",
        }
    }
}
