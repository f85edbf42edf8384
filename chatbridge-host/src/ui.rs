//! Updates pushed to the front end
//!
//! The bridge never renders anything itself. After each state change it
//! emits one or more [`UiUpdate`] values; the headless binary prints them,
//! a graphical shell would redraw from them.

use std::fmt;

use serde::Serialize;

use crate::session::{ChatMessage, RosterEntry, ServerPanel, Session, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeLevel::Info => f.write_str("info"),
            NoticeLevel::Warning => f.write_str("warning"),
            NoticeLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum UiUpdate {
    MessageAppended {
        message: ChatMessage,
    },
    /// Full roster in display order
    RosterChanged {
        entries: Vec<RosterEntry>,
    },
    SessionChanged {
        state: SessionState,
        session: Session,
    },
    ServerChanged {
        panel: ServerPanel,
    },
    /// One line for the server output pane
    ServerLog {
        line: String,
    },
    Notice {
        level: NoticeLevel,
        text: String,
        /// Interrupts the user until acknowledged
        blocking: bool,
    },
}

impl UiUpdate {
    pub fn info(text: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Info, text, false)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Warning, text, false)
    }

    pub fn notice(level: NoticeLevel, text: impl Into<String>, blocking: bool) -> Self {
        UiUpdate::Notice {
            level,
            text: text.into(),
            blocking,
        }
    }
}

impl fmt::Display for UiUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiUpdate::MessageAppended { message } => write!(
                f,
                "[{}] {}: {}",
                message.timestamp.format("%H:%M:%S"),
                message.author,
                message.text
            ),
            UiUpdate::RosterChanged { entries } => {
                f.write_str("roster:")?;
                if entries.is_empty() {
                    return f.write_str(" (empty)");
                }
                for (i, entry) in entries.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{}{} ({})", sep, entry.username, entry.status)?;
                }
                Ok(())
            }
            UiUpdate::SessionChanged { state, session } => {
                write!(f, "session: {}", state)?;
                if let Some(user) = &session.current_user {
                    write!(f, " as {}", user)?;
                }
                if let Some(address) = &session.server_address {
                    write!(f, " @ {}", address)?;
                }
                if session.voice_active {
                    f.write_str(" [voice]")?;
                }
                Ok(())
            }
            UiUpdate::ServerChanged { panel } => {
                write!(f, "server: {}", panel.state)?;
                if let Some(address) = &panel.address {
                    write!(f, " on {}", address)?;
                }
                write!(
                    f,
                    " ({} connected, {} in voice)",
                    panel.connected_users, panel.voice_users
                )
            }
            UiUpdate::ServerLog { line } => write!(f, "server> {}", line),
            UiUpdate::Notice {
                level,
                text,
                blocking,
            } => {
                if *blocking {
                    write!(f, "!! {}: {}", level, text)
                } else {
                    write!(f, "{}: {}", level, text)
                }
            }
        }
    }
}
