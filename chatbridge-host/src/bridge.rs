//! The bridge loop
//!
//! One task owns the [`ProcessSupervisor`] and the [`SessionMachine`] and
//! drains two queues: user intents from the front end and reports from the
//! per-process tasks. Nothing else mutates session state, so events are
//! applied strictly in arrival order without locking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use chatbridge_protocol::{classify, is_reserved_command, Role};
use chatbridge_utils::{BridgeError, Result};

use crate::command::{Command, CommandChannel};
use crate::config::AppConfig;
use crate::process::{
    BinaryLocator, ExitInfo, PortReclaimer, ProcessEvent, ProcessSupervisor, StopOutcome,
    SupervisorEvent, SupervisorSettings, TreeKiller,
};
use crate::session::{Effect, SessionMachine};
use crate::ui::UiUpdate;

/// Extra time allowed on shutdown beyond the grace and drain periods
const SHUTDOWN_MARGIN: Duration = Duration::from_millis(500);

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    StartServer,
    StopServer,
    Login {
        address: String,
        username: String,
        password: String,
    },
    SendMessage(String),
    ToggleVoice,
    /// Ask the client to disconnect
    Exit,
    /// Stop both processes and end the loop
    Shutdown,
}

/// Cloneable sender for intents
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    intents: mpsc::UnboundedSender<Intent>,
}

impl BridgeHandle {
    pub fn send(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| BridgeError::internal("bridge loop has stopped"))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Intent::Shutdown)
    }

    /// The loop is still accepting intents
    pub fn is_open(&self) -> bool {
        !self.intents.is_closed()
    }
}

pub struct Bridge {
    supervisor: ProcessSupervisor,
    machine: SessionMachine,
    intents: mpsc::UnboundedReceiver<Intent>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    ui: mpsc::UnboundedSender<UiUpdate>,
}

impl Bridge {
    /// Build a bridge, the handle that feeds it, and the stream of UI updates
    pub fn new(
        config: &AppConfig,
        locator: Arc<dyn BinaryLocator>,
    ) -> (Self, BridgeHandle, mpsc::UnboundedReceiver<UiUpdate>) {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let supervisor =
            ProcessSupervisor::new(SupervisorSettings::from_config(config), locator, events_tx);

        let bridge = Self {
            supervisor,
            machine: SessionMachine::new(&config.session),
            intents: intents_rx,
            events: events_rx,
            ui: ui_tx,
        };
        (bridge, BridgeHandle { intents: intents_tx }, ui_rx)
    }

    pub fn with_tree_killer(mut self, killer: Arc<dyn TreeKiller>) -> Self {
        self.supervisor = self.supervisor.with_tree_killer(killer);
        self
    }

    pub fn with_port_reclaimer(mut self, reclaimer: Arc<dyn PortReclaimer>) -> Self {
        self.supervisor = self.supervisor.with_port_reclaimer(reclaimer);
        self
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Run until a Shutdown intent arrives or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!("Bridge loop started");

        loop {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.handle_intent(intent),
                },
                Some(event) = self.events.recv() => self.handle_process_event(event),
            }
        }

        self.shutdown().await;
        info!("Bridge loop stopped");
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!(live = self.supervisor.live_count(), "Shutting down");
        for role in Role::ALL {
            self.stop_role(role);
        }

        let settings = self.supervisor.settings();
        let limit = settings.grace_period + settings.drain_timeout + SHUTDOWN_MARGIN;
        let drained = tokio::time::timeout(limit, async {
            while self.supervisor.live_count() > 0 {
                match self.events.recv().await {
                    Some(event) => self.handle_process_event(event),
                    None => break,
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                live = self.supervisor.live_count(),
                "Processes still live at shutdown"
            );
        }
    }

    // ==================== Intents ====================

    pub(crate) fn handle_intent(&mut self, intent: Intent) {
        debug!(intent = ?IntentKind(&intent), "Handling intent");

        match intent {
            Intent::StartServer => match self.supervisor.start(Role::Server, Vec::new()) {
                Ok(_) => {
                    let effects = self.machine.on_server_starting();
                    self.emit(effects);
                }
                Err(BridgeError::AlreadyRunning { .. }) => {
                    self.notify(UiUpdate::info("Server is already running"));
                }
                Err(e) => {
                    let effects = self.machine.on_start_failed(Role::Server, e);
                    self.emit(effects);
                }
            },

            Intent::StopServer => {
                if self.stop_role(Role::Server) == StopOutcome::NotRunning {
                    self.notify(UiUpdate::info("Server is not running"));
                }
            }

            Intent::Login {
                address,
                username,
                password,
            } => self.login(&address, username.trim(), &password),

            Intent::SendMessage(text) => {
                if text.trim().is_empty() {
                    return;
                }
                let sent = self.send(&Command::Chat(text.clone()));
                if sent && self.machine.is_authenticated() && !is_reserved_command(&text) {
                    let effects = self.machine.local_echo(&text);
                    self.emit(effects);
                }
            }

            Intent::ToggleVoice => {
                self.send(&Command::ToggleVoice);
            }

            Intent::Exit => {
                self.send(&Command::Exit);
            }

            // Handled by the loop itself
            Intent::Shutdown => {}
        }
    }

    fn login(&mut self, address: &str, username: &str, password: &str) {
        if username.is_empty() || password.is_empty() {
            self.notify(UiUpdate::warning("Username and password are required"));
            return;
        }
        if self.supervisor.is_live(Role::Client) {
            self.notify(UiUpdate::warning("Already connected; exit first"));
            return;
        }

        let (address, effects) = self.machine.begin_login(address, username);
        self.emit(effects);

        let args = vec![address, username.to_string(), password.to_string()];
        if let Err(e) = self.supervisor.start(Role::Client, args) {
            let effects = self.machine.on_start_failed(Role::Client, e);
            self.emit(effects);
        }
    }

    /// Write `command` to the client; returns whether it was queued
    fn send(&mut self, command: &Command) -> bool {
        let voice_active = self.machine.session().voice_active;
        let result = CommandChannel::new(&self.supervisor).send_command(command, voice_active);

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Client input dropped");
                self.notify(UiUpdate::warning(e.to_string()));
                false
            }
        }
    }

    fn stop_role(&mut self, role: Role) -> StopOutcome {
        let outcome = self.supervisor.stop(role);
        if outcome == StopOutcome::Cancelled {
            // No exit event will follow a cancelled start
            let effects = match role {
                Role::Client => self.machine.on_client_exit(ExitInfo::default(), true),
                Role::Server => self.machine.on_server_exit(ExitInfo::default(), true),
            };
            self.emit(effects);
        }
        outcome
    }

    // ==================== Process events ====================

    pub(crate) fn handle_process_event(&mut self, event: ProcessEvent) {
        let Some(event) = self.supervisor.handle_event(event) else {
            return;
        };

        let effects = match event {
            SupervisorEvent::Started { role, pid } => {
                debug!(role = %role, pid, "Process started");
                match role {
                    Role::Server => vec![Effect::Ui(UiUpdate::ServerLog {
                        line: format!("server started (pid {})", pid),
                    })],
                    Role::Client => Vec::new(),
                }
            }
            SupervisorEvent::StartFailed { role, error } => {
                self.machine.on_start_failed(role, error)
            }
            SupervisorEvent::Line { role, stream, line } => match classify(role, &line) {
                Ok(Some(event)) => self.machine.apply(role, event),
                Ok(None) => {
                    trace!(role = %role, stream = %stream, line = %line, "Suppressed line");
                    Vec::new()
                }
                Err(e) => {
                    self.machine.record_decode_error(role, &line, &e);
                    Vec::new()
                }
            },
            SupervisorEvent::Exited {
                role,
                exit,
                requested,
            } => match role {
                Role::Client => self.machine.on_client_exit(exit, requested),
                Role::Server => self.machine.on_server_exit(exit, requested),
            },
            SupervisorEvent::TerminationTimeout { role, error } => {
                self.machine.on_termination_timeout(role, error)
            }
        };
        self.emit(effects);
    }

    fn emit(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Ui(update) => self.notify(update),
                Effect::TerminateClient => {
                    self.stop_role(Role::Client);
                }
            }
        }
    }

    fn notify(&self, update: UiUpdate) {
        if self.ui.send(update).is_err() {
            trace!("UI receiver dropped");
        }
    }
}

/// Debug view of an intent that never prints the password
struct IntentKind<'a>(&'a Intent);

impl std::fmt::Debug for IntentKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Intent::Login {
                address, username, ..
            } => f
                .debug_struct("Login")
                .field("address", address)
                .field("username", username)
                .finish_non_exhaustive(),
            Intent::SendMessage(text) => write!(f, "SendMessage({} bytes)", text.len()),
            other => write!(f, "{:?}", other),
        }
    }
}
