//! chatbridge-protocol: the text contract spoken by the server and client executables
//!
//! This crate turns raw subprocess output into typed events:
//! - [`LineCodec`] reassembles newline-delimited lines from arbitrarily chunked bytes
//! - [`classify`] runs the ordered matchers over one line and yields a [`ProtocolEvent`]
//!
//! Nothing here knows about session state; the host crate owns that.

pub mod classify;
pub mod codec;
pub mod events;
pub mod types;

// Re-export main types at crate root
pub use classify::{classify, normalize_line, DecodeError};
pub use codec::{CodecError, LineCodec};
pub use events::ProtocolEvent;
pub use types::{PresenceStatus, Role, RosterRecord, StreamKind};

/// Reserved client command: join voice chat
pub const CMD_VOICE: &str = "/voice";
/// Reserved client command: leave voice chat
pub const CMD_LEAVE: &str = "/leave";
/// Reserved client command: disconnect and exit
pub const CMD_EXIT: &str = "/exit";

/// Whether a line of user input is one of the reserved client commands
pub fn is_reserved_command(text: &str) -> bool {
    matches!(text.trim(), CMD_VOICE | CMD_LEAVE | CMD_EXIT)
}
