//! Session state: login lifecycle, roster, chat log and diagnostics

mod diagnostics;
mod log;
mod machine;
mod roster;

pub use diagnostics::{Diagnostic, Diagnostics};
pub use log::{ChatMessage, MessageLog, MessageOrigin, SYSTEM_AUTHOR};
pub use machine::{Effect, ServerPanel, ServerState, Session, SessionMachine, SessionState};
pub use roster::{Roster, RosterEntry};
