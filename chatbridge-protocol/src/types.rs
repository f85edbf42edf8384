//! Shared data types for the chatbridge line protocol

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which of the two supervised executables a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Both roles, server first
    pub const ALL: [Role; 2] = [Role::Server, Role::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output stream of a subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Presence of a user as reported by the server
///
/// Wire spelling is `online`, `in-voice`, `offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceStatus {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "in-voice")]
    InVoice,
    #[serde(rename = "offline")]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::InVoice => "in-voice",
            PresenceStatus::Offline => "offline",
        }
    }

    /// Connected in any form (text or voice)
    pub fn is_present(&self) -> bool {
        !matches!(self, PresenceStatus::Offline)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "online" => Ok(PresenceStatus::Online),
            "in-voice" => Ok(PresenceStatus::InVoice),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(other.to_string()),
        }
    }
}

/// One `{username, status}` element of a `USER_LIST` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub username: String,
    pub status: PresenceStatus,
}

impl RosterRecord {
    pub fn new(username: impl Into<String>, status: PresenceStatus) -> Self {
        Self {
            username: username.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Server.to_string(), "server");
        assert_eq!(Role::Client.to_string(), "client");
    }

    #[test]
    fn test_presence_from_str() {
        assert_eq!("online".parse::<PresenceStatus>(), Ok(PresenceStatus::Online));
        assert_eq!("in-voice".parse::<PresenceStatus>(), Ok(PresenceStatus::InVoice));
        assert_eq!(" offline ".parse::<PresenceStatus>(), Ok(PresenceStatus::Offline));
        assert_eq!("away".parse::<PresenceStatus>(), Err("away".to_string()));
    }

    #[test]
    fn test_presence_wire_spelling() {
        let json = serde_json::to_string(&PresenceStatus::InVoice).unwrap();
        assert_eq!(json, "\"in-voice\"");
    }

    #[test]
    fn test_roster_record_from_server_json() {
        let records: Vec<RosterRecord> =
            serde_json::from_str(r#"[{"username":"alice","status":"in-voice"}]"#).unwrap();
        assert_eq!(records, vec![RosterRecord::new("alice", PresenceStatus::InVoice)]);
    }

    #[test]
    fn test_is_present() {
        assert!(PresenceStatus::Online.is_present());
        assert!(PresenceStatus::InVoice.is_present());
        assert!(!PresenceStatus::Offline.is_present());
    }
}
