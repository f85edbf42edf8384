//! Session state machine
//!
//! Owns the session, roster, message log, server panel and diagnostics.
//! Every protocol event and process exit is funneled through here by the
//! bridge loop, one at a time; the machine answers with [`Effect`]s for the
//! loop to carry out.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use chatbridge_protocol::{DecodeError, PresenceStatus, ProtocolEvent, Role};
use chatbridge_utils::BridgeError;

use super::diagnostics::Diagnostics;
use super::log::{ChatMessage, MessageLog, MessageOrigin};
use super::roster::{Roster, RosterEntry};
use crate::config::SessionConfig;
use crate::process::ExitInfo;
use crate::ui::{NoticeLevel, UiUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    LoggedOut,
    Authenticating,
    Authenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::LoggedOut => f.write_str("logged out"),
            SessionState::Authenticating => f.write_str("authenticating"),
            SessionState::Authenticated => f.write_str("authenticated"),
        }
    }
}

/// Who is logged in, and where
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub current_user: Option<String>,
    pub authenticated: bool,
    pub server_address: Option<String>,
    /// Set only by a voice confirmation from the client
    pub voice_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => f.write_str("stopped"),
            ServerState::Starting => f.write_str("starting"),
            ServerState::Running => f.write_str("running"),
        }
    }
}

/// Status of the locally hosted server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerPanel {
    pub state: ServerState,
    pub address: Option<String>,
    pub connected_users: usize,
    pub voice_users: usize,
}

/// What the bridge loop must do after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Ui(UiUpdate),
    /// Stop the client process tree
    TerminateClient,
}

#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    session: Session,
    roster: Roster,
    log: MessageLog,
    panel: ServerPanel,
    diagnostics: Diagnostics,
    default_address: String,
}

impl SessionMachine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: SessionState::LoggedOut,
            session: Session::default(),
            roster: Roster::new(),
            log: MessageLog::new(),
            panel: ServerPanel::default(),
            diagnostics: Diagnostics::new(config.diagnostics_capacity),
            default_address: config.default_server_address.clone(),
        }
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn messages(&self) -> &MessageLog {
        &self.log
    }

    pub fn server_panel(&self) -> &ServerPanel {
        &self.panel
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Roster in display order for the current user
    pub fn roster_view(&self) -> Vec<RosterEntry> {
        self.roster
            .display_order(self.session.current_user.as_deref())
    }

    // ==================== Intents ====================

    /// Reset everything and wait for the client to authenticate
    ///
    /// A blank address falls back to the configured default. Returns the
    /// address the client should be started with.
    pub fn begin_login(&mut self, address: &str, username: &str) -> (String, Vec<Effect>) {
        let address = match address.trim() {
            "" => self.default_address.clone(),
            given => given.to_string(),
        };

        self.roster.clear();
        self.session = Session {
            server_address: Some(address.clone()),
            ..Session::default()
        };
        self.state = SessionState::Authenticating;
        info!(user = %username, address = %address, "Login started");

        let mut effects = vec![self.session_update(), self.roster_update()];
        effects.extend(self.refresh_panel());
        (address, effects)
    }

    /// The server start was accepted
    pub fn on_server_starting(&mut self) -> Vec<Effect> {
        self.panel = ServerPanel {
            state: ServerState::Starting,
            ..ServerPanel::default()
        };
        vec![self.panel_update()]
    }

    /// Echo text the local user just sent; the server only relays to others
    pub fn local_echo(&mut self, text: &str) -> Vec<Effect> {
        let author = self.session.current_user.clone().unwrap_or_default();
        vec![self.append(ChatMessage::new(author, text, MessageOrigin::User))]
    }

    // ==================== Protocol events ====================

    /// Apply one decoded event from `origin`'s output
    pub fn apply(&mut self, origin: Role, event: ProtocolEvent) -> Vec<Effect> {
        debug!(role = %origin, event = event.name(), state = %self.state, "Applying event");

        match event {
            ProtocolEvent::LoginSuccess { user } => self.on_login_success(user),
            ProtocolEvent::LoginFailure { reason } => self.on_login_failure(reason),
            ProtocolEvent::SessionInvalidated { reason } => self.on_session_invalidated(reason),

            ProtocolEvent::StatusUpdate { user, status } => {
                if !self.require_authenticated("StatusUpdate") {
                    return Vec::new();
                }
                self.roster.upsert(user, status);
                self.roster_changed()
            }

            ProtocolEvent::UserListSnapshot { list } => {
                if !self.require_authenticated("UserListSnapshot") {
                    return Vec::new();
                }
                let preserved = self
                    .session
                    .current_user
                    .as_deref()
                    .filter(|me| !list.iter().any(|r| r.username == *me))
                    .and_then(|me| self.roster.get(me).map(|status| (me.to_string(), status)));

                self.roster.replace(list);
                if let Some((me, status)) = preserved {
                    self.roster.upsert(me, status);
                }
                self.roster_changed()
            }

            ProtocolEvent::ChatLine { author, text } => {
                if !self.require_authenticated("ChatLine") {
                    return Vec::new();
                }
                let origin = if self.session.current_user.as_deref() == Some(author.as_str()) {
                    MessageOrigin::User
                } else {
                    MessageOrigin::Other
                };
                vec![self.append(ChatMessage::new(author, text, origin))]
            }

            ProtocolEvent::JoinNotice { user } => {
                if !self.require_authenticated("JoinNotice") {
                    return Vec::new();
                }
                let line = format!("{} joined the chat", user);
                self.roster.upsert(user, PresenceStatus::Online);
                let mut effects = vec![self.append(ChatMessage::system(line))];
                effects.extend(self.roster_changed());
                effects
            }

            ProtocolEvent::LeaveNotice { user } => {
                if !self.require_authenticated("LeaveNotice") {
                    return Vec::new();
                }
                let line = format!("{} left the chat", user);
                self.roster.upsert(user, PresenceStatus::Offline);
                let mut effects = vec![self.append(ChatMessage::system(line))];
                effects.extend(self.roster_changed());
                effects
            }

            ProtocolEvent::VoiceJoined => self.set_voice(true),
            ProtocolEvent::VoiceLeft => self.set_voice(false),

            ProtocolEvent::ServerStarted { address } => {
                info!(address = %address, "Server reported startup");
                let line = format!("listening on {}", address);
                self.panel.state = ServerState::Running;
                self.panel.address = Some(address);
                // The full panel update below already carries the counters
                self.refresh_panel();
                vec![
                    self.panel_update(),
                    Effect::Ui(UiUpdate::ServerLog { line }),
                ]
            }

            ProtocolEvent::ServerShutdown { reason } => {
                let text = format!("Server shutting down: {}", reason);
                vec![
                    Effect::Ui(UiUpdate::warning(text.clone())),
                    self.append(ChatMessage::system(text)),
                ]
            }

            ProtocolEvent::GenericError { text } => vec![
                Effect::Ui(UiUpdate::notice(NoticeLevel::Error, text.clone(), false)),
                self.append(ChatMessage::system(format!("Error: {}", text))),
            ],

            ProtocolEvent::Unclassified { text } => match origin {
                Role::Client => vec![self.append(ChatMessage::system(text))],
                Role::Server => vec![Effect::Ui(UiUpdate::ServerLog { line: text })],
            },
        }
    }

    /// A line could not be decoded; state is left untouched
    pub fn record_decode_error(&mut self, origin: Role, line: &str, error: &DecodeError) {
        debug!(role = %origin, line, "Undecodable line");
        self.diagnostics
            .record(&BridgeError::decode(format!("{} ({})", error, origin)));
    }

    fn on_login_success(&mut self, user: String) -> Vec<Effect> {
        match self.state {
            SessionState::Authenticating => {
                info!(user = %user, "Authenticated");
                self.roster.upsert(user.clone(), PresenceStatus::Online);
                self.session.current_user = Some(user);
                self.session.authenticated = true;
                self.state = SessionState::Authenticated;

                let mut effects = vec![self.session_update()];
                effects.extend(self.roster_changed());
                effects
            }
            SessionState::Authenticated => {
                warn!(user = %user, "Duplicate login success ignored");
                Vec::new()
            }
            SessionState::LoggedOut => {
                self.violation("LoginSuccess");
                Vec::new()
            }
        }
    }

    fn on_login_failure(&mut self, reason: String) -> Vec<Effect> {
        if self.state != SessionState::Authenticating {
            // Authenticated: left as is, the session stays up
            self.violation("LoginFailure");
            return Vec::new();
        }

        info!(reason = %reason, "Login failed");
        let mut effects = vec![
            Effect::Ui(UiUpdate::notice(
                NoticeLevel::Error,
                format!("Login failed: {}", reason),
                true,
            )),
            Effect::TerminateClient,
        ];
        effects.extend(self.reset());
        effects
    }

    fn on_session_invalidated(&mut self, reason: String) -> Vec<Effect> {
        if self.state != SessionState::Authenticated {
            self.violation("SessionInvalidated");
            return Vec::new();
        }

        info!(reason = %reason, "Session invalidated");
        let mut effects = vec![
            Effect::Ui(UiUpdate::notice(NoticeLevel::Warning, reason.clone(), true)),
            self.append(ChatMessage::system(reason)),
        ];
        effects.extend(self.reset());
        effects
    }

    fn set_voice(&mut self, active: bool) -> Vec<Effect> {
        let event = if active { "VoiceJoined" } else { "VoiceLeft" };
        if !self.require_authenticated(event) {
            return Vec::new();
        }

        self.session.voice_active = active;
        let status = if active {
            PresenceStatus::InVoice
        } else {
            PresenceStatus::Online
        };
        if let Some(me) = self.session.current_user.clone() {
            self.roster.upsert(me, status);
        }

        let mut effects = vec![self.session_update()];
        effects.extend(self.roster_changed());
        effects
    }

    // ==================== Process lifecycle ====================

    pub fn on_client_exit(&mut self, exit: ExitInfo, requested: bool) -> Vec<Effect> {
        let mut effects = self.abnormal_exit(Role::Client, exit, requested);

        match self.state {
            SessionState::Authenticated => {
                info!(exit = %exit, "Client exited; disconnecting");
                effects.push(self.append(ChatMessage::system(format!(
                    "Disconnected ({})",
                    exit
                ))));
                effects.extend(self.reset());
            }
            SessionState::Authenticating => {
                info!(exit = %exit, "Client exited before authenticating");
                effects.push(Effect::Ui(UiUpdate::notice(
                    NoticeLevel::Error,
                    format!("Login failed: client exited ({})", exit),
                    false,
                )));
                effects.extend(self.reset());
            }
            SessionState::LoggedOut => {}
        }
        effects
    }

    pub fn on_server_exit(&mut self, exit: ExitInfo, requested: bool) -> Vec<Effect> {
        let mut effects = self.abnormal_exit(Role::Server, exit, requested);
        self.panel = ServerPanel::default();
        effects.push(self.panel_update());
        effects.push(Effect::Ui(UiUpdate::ServerLog {
            line: format!("server exited ({})", exit),
        }));
        effects
    }

    /// The start attempt for `role` failed before a process existed
    pub fn on_start_failed(&mut self, role: Role, error: BridgeError) -> Vec<Effect> {
        self.diagnostics.record(&error);
        let mut effects = vec![Effect::Ui(UiUpdate::notice(
            NoticeLevel::Error,
            error.to_string(),
            error.is_blocking(),
        ))];

        match role {
            Role::Client => {
                if self.state == SessionState::Authenticating {
                    effects.extend(self.reset());
                }
            }
            Role::Server => {
                self.panel = ServerPanel::default();
                effects.push(self.panel_update());
            }
        }
        effects
    }

    /// The grace period ran out and `role`'s local state was cleared
    ///
    /// No exit event follows, so this also runs the exit handling.
    pub fn on_termination_timeout(&mut self, role: Role, error: BridgeError) -> Vec<Effect> {
        self.diagnostics.record(&error);
        let mut effects = vec![Effect::Ui(UiUpdate::warning(error.to_string()))];
        effects.extend(match role {
            Role::Client => self.on_client_exit(ExitInfo::default(), true),
            Role::Server => self.on_server_exit(ExitInfo::default(), true),
        });
        effects
    }

    fn abnormal_exit(&mut self, role: Role, exit: ExitInfo, requested: bool) -> Vec<Effect> {
        if requested || exit.is_success() {
            return Vec::new();
        }
        let error = BridgeError::ProcessExitAbnormal {
            role: role.to_string(),
            code: exit.code,
            signal: exit.signal,
        };
        self.diagnostics.record(&error);
        vec![Effect::Ui(UiUpdate::notice(
            NoticeLevel::Error,
            error.to_string(),
            false,
        ))]
    }

    // ==================== Helpers ====================

    fn reset(&mut self) -> Vec<Effect> {
        self.state = SessionState::LoggedOut;
        self.session = Session::default();
        self.roster.clear();

        let mut effects = vec![self.session_update(), self.roster_update()];
        effects.extend(self.refresh_panel());
        effects
    }

    fn require_authenticated(&mut self, event: &str) -> bool {
        if self.state == SessionState::Authenticated {
            return true;
        }
        self.violation(event);
        false
    }

    fn violation(&mut self, event: &str) {
        self.diagnostics
            .record(&BridgeError::violation(event, self.state.to_string()));
    }

    fn append(&mut self, message: ChatMessage) -> Effect {
        let message = self.log.push(message).clone();
        Effect::Ui(UiUpdate::MessageAppended { message })
    }

    fn roster_changed(&mut self) -> Vec<Effect> {
        let mut effects = vec![self.roster_update()];
        effects.extend(self.refresh_panel());
        effects
    }

    /// Recount panel users from the roster while the server is running
    fn refresh_panel(&mut self) -> Option<Effect> {
        if self.panel.state != ServerState::Running {
            return None;
        }
        let connected = self.roster.connected_count();
        let voice = self.roster.voice_count();
        if connected == self.panel.connected_users && voice == self.panel.voice_users {
            return None;
        }
        self.panel.connected_users = connected;
        self.panel.voice_users = voice;
        Some(self.panel_update())
    }

    fn session_update(&self) -> Effect {
        Effect::Ui(UiUpdate::SessionChanged {
            state: self.state,
            session: self.session.clone(),
        })
    }

    fn roster_update(&self) -> Effect {
        Effect::Ui(UiUpdate::RosterChanged {
            entries: self.roster_view(),
        })
    }

    fn panel_update(&self) -> Effect {
        Effect::Ui(UiUpdate::ServerChanged {
            panel: self.panel.clone(),
        })
    }
}
