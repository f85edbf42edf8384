//! Writing user input to the client's stdin

use tracing::debug;

use chatbridge_protocol::{Role, CMD_EXIT, CMD_LEAVE, CMD_VOICE};
use chatbridge_utils::{BridgeError, Result};

use crate::process::ProcessSupervisor;

/// High-level user intent destined for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    ToggleVoice,
    Exit,
}

impl Command {
    /// Wire text for this command; `voice_active` picks join or leave
    pub fn encode(&self, voice_active: bool) -> String {
        match self {
            Command::Chat(text) => text.replace(['\r', '\n'], " "),
            Command::ToggleVoice if voice_active => CMD_LEAVE.to_string(),
            Command::ToggleVoice => CMD_VOICE.to_string(),
            Command::Exit => CMD_EXIT.to_string(),
        }
    }
}

/// Borrowed view of the supervisor that only writes to the client
pub struct CommandChannel<'a> {
    supervisor: &'a ProcessSupervisor,
}

impl<'a> CommandChannel<'a> {
    pub fn new(supervisor: &'a ProcessSupervisor) -> Self {
        Self { supervisor }
    }

    /// Whether a write would reach a running client
    pub fn is_connected(&self) -> bool {
        self.supervisor.input(Role::Client).is_some()
    }

    /// Queue one line for the client; the writer task adds the terminator
    pub fn send(&self, text: &str) -> Result<()> {
        let line = text.replace(['\r', '\n'], " ");
        let input = self
            .supervisor
            .input(Role::Client)
            .ok_or(BridgeError::NotConnected)?;
        input.send(line).map_err(|_| BridgeError::NotConnected)?;
        debug!(len = text.len(), "Queued client input");
        Ok(())
    }

    pub fn send_command(&self, command: &Command, voice_active: bool) -> Result<()> {
        self.send(&command.encode(voice_active))
    }
}
