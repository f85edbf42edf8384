//! Process supervisor
//!
//! Owns at most one live [`ProcessHandle`] per role. `start` and `stop` never
//! block: the slow parts (locating the executable, reclaiming ports,
//! spawning, waiting out the grace period) run in tasks that report back
//! through the process-event queue, which the owner drains and feeds to
//! [`ProcessSupervisor::handle_event`].
//!
//! Every event carries the generation of the process that produced it. Events
//! from an earlier process of the same role are stale and dropped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatbridge_protocol::{Role, StreamKind};
use chatbridge_utils::{BridgeError, Result};

use super::handle::{ExitInfo, ProcessHandle, ProcessState};
use super::io;
use super::launch::{BinaryLocator, LaunchSpec, Locate};
use super::ports::{reclaim_ports, PortReclaimer, SystemPortReclaimer};
use super::tree::{PlatformTreeKiller, TreeKiller};
use crate::config::AppConfig;

/// Raw reports from the per-process tasks
#[derive(Debug)]
pub enum ProcessEvent {
    /// The launch task finished, with a running child or the reason it failed
    Spawned {
        role: Role,
        generation: u64,
        result: Result<SpawnedChild>,
    },
    Line {
        role: Role,
        generation: u64,
        stream: StreamKind,
        line: String,
    },
    Exited {
        role: Role,
        generation: u64,
        exit: ExitInfo,
    },
    /// The grace period after a stop request elapsed
    StopDeadline { role: Role, generation: u64 },
}

impl ProcessEvent {
    fn origin(&self) -> (Role, u64) {
        match self {
            ProcessEvent::Spawned {
                role, generation, ..
            }
            | ProcessEvent::Line {
                role, generation, ..
            }
            | ProcessEvent::Exited {
                role, generation, ..
            }
            | ProcessEvent::StopDeadline { role, generation } => (*role, *generation),
        }
    }
}

/// A child that made it past spawn
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: u32,
    pub input: mpsc::UnboundedSender<String>,
}

/// What the supervisor reports upward after applying a [`ProcessEvent`]
#[derive(Debug)]
pub enum SupervisorEvent {
    Started {
        role: Role,
        pid: u32,
    },
    StartFailed {
        role: Role,
        error: BridgeError,
    },
    Line {
        role: Role,
        stream: StreamKind,
        line: String,
    },
    Exited {
        role: Role,
        exit: ExitInfo,
        /// The exit follows a `stop` request
        requested: bool,
    },
    /// Local state was force-cleared; the OS process may still be alive
    TerminationTimeout {
        role: Role,
        error: BridgeError,
    },
}

/// Result of a `stop` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing live for the role
    NotRunning,
    /// The handle was still Starting and is now Killed; no exit event will follow
    Cancelled,
    /// Termination requested; an exit or a timeout will follow
    Terminating,
}

/// Supervisor tunables, taken from the `[supervisor]` and `[server]` config sections
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub grace_period: Duration,
    pub locate_retry_interval: Duration,
    pub locate_retry_attempts: u32,
    pub drain_timeout: Duration,
    /// Ports reclaimed before the server starts; empty disables reclamation
    pub server_ports: Vec<u16>,
}

impl SupervisorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            grace_period: config.supervisor.grace_period(),
            locate_retry_interval: config.supervisor.locate_retry_interval(),
            locate_retry_attempts: config.supervisor.locate_retry_attempts.max(1),
            drain_timeout: config.supervisor.drain_timeout(),
            server_ports: if config.server.reclaim_ports {
                config.server.ports.clone()
            } else {
                Vec::new()
            },
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Starts, stops and tracks the server and client processes
pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    locator: Arc<dyn BinaryLocator>,
    killer: Arc<dyn TreeKiller>,
    reclaimer: Arc<dyn PortReclaimer>,
    handles: HashMap<Role, ProcessHandle>,
    next_generation: u64,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl ProcessSupervisor {
    /// Create a supervisor whose tasks report into `events`
    pub fn new(
        settings: SupervisorSettings,
        locator: Arc<dyn BinaryLocator>,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Self {
        Self {
            settings,
            locator,
            killer: Arc::new(PlatformTreeKiller),
            reclaimer: Arc::new(SystemPortReclaimer),
            handles: HashMap::new(),
            next_generation: 0,
            events,
        }
    }

    /// Replace the platform tree killer
    pub fn with_tree_killer(mut self, killer: Arc<dyn TreeKiller>) -> Self {
        self.killer = killer;
        self
    }

    /// Replace the system port reclaimer
    pub fn with_port_reclaimer(mut self, reclaimer: Arc<dyn PortReclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Begin starting `role` with `args` appended to the executable's leading args
    ///
    /// The handle is Starting when this returns. Returns the new generation,
    /// or `AlreadyRunning` if the role is already Starting or Running.
    pub fn start(&mut self, role: Role, args: Vec<String>) -> Result<u64> {
        if let Some(handle) = self.handles.get(&role) {
            if handle.is_live() {
                warn!(
                    role = %role,
                    state = ?handle.state(),
                    "Start rejected: process already live"
                );
                return Err(BridgeError::AlreadyRunning {
                    role: role.to_string(),
                });
            }
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();

        self.handles
            .insert(role, ProcessHandle::starting(role, generation, cancel.clone()));

        let job = LaunchJob {
            role,
            generation,
            args,
            settings: self.settings.clone(),
            locator: self.locator.clone(),
            reclaimer: self.reclaimer.clone(),
            events: self.events.clone(),
            cancel,
        };
        tokio::spawn(job.run());

        info!(role = %role, generation, "Starting process");
        Ok(generation)
    }

    /// Request termination of `role`'s process tree
    pub fn stop(&mut self, role: Role) -> StopOutcome {
        let Some(handle) = self.handles.get_mut(&role) else {
            return StopOutcome::NotRunning;
        };

        match handle.state {
            ProcessState::Starting => {
                info!(role = %role, "Stop while starting; child will be killed on arrival");
                handle.stop_requested = true;
                handle.finish(ProcessState::Killed);
                StopOutcome::Cancelled
            }
            ProcessState::Running => {
                if handle.stop_requested {
                    debug!(role = %role, "Stop already in progress");
                    return StopOutcome::Terminating;
                }
                handle.stop_requested = true;

                if let Some(pid) = handle.pid {
                    match self.killer.terminate_tree(pid) {
                        Ok(()) => info!(role = %role, pid, "Termination requested"),
                        Err(e) => warn!(role = %role, pid, error = %e, "Termination request failed"),
                    }
                }

                let events = self.events.clone();
                let generation = handle.generation;
                let grace = self.settings.grace_period;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = events.send(ProcessEvent::StopDeadline { role, generation });
                });

                StopOutcome::Terminating
            }
            ProcessState::Exited(_) | ProcessState::Killed => StopOutcome::NotRunning,
        }
    }

    /// Apply one task report; returns what the owner should react to, if anything
    pub fn handle_event(&mut self, event: ProcessEvent) -> Option<SupervisorEvent> {
        let (role, generation) = event.origin();
        let handle = match self.handles.get_mut(&role) {
            Some(handle) if handle.generation == generation => handle,
            _ => {
                debug!(role = %role, generation, "Dropping stale process event");
                return None;
            }
        };

        match event {
            ProcessEvent::Spawned {
                result: Ok(child), ..
            } => {
                if handle.state != ProcessState::Starting {
                    info!(
                        role = %role,
                        pid = child.pid,
                        state = ?handle.state,
                        "Child arrived after stop; terminating"
                    );
                    if let Err(e) = self.killer.terminate_tree(child.pid) {
                        warn!(role = %role, pid = child.pid, error = %e, "Termination request failed");
                    }
                    return None;
                }

                handle.pid = Some(child.pid);
                handle.input = Some(child.input);
                handle.state = ProcessState::Running;
                info!(role = %role, pid = child.pid, "Process running");
                Some(SupervisorEvent::Started {
                    role,
                    pid: child.pid,
                })
            }

            ProcessEvent::Spawned {
                result: Err(error), ..
            } => {
                if handle.state != ProcessState::Starting {
                    debug!(role = %role, error = %error, "Start failure after stop ignored");
                    return None;
                }
                warn!(role = %role, error = %error, "Start failed");
                handle.failure = Some(error.to_string());
                handle.finish(ProcessState::Exited(ExitInfo::default()));
                Some(SupervisorEvent::StartFailed { role, error })
            }

            ProcessEvent::Line { stream, line, .. } => {
                Some(SupervisorEvent::Line { role, stream, line })
            }

            ProcessEvent::Exited { exit, .. } => {
                if !handle.is_live() {
                    debug!(role = %role, exit = %exit, "Exit after local state was cleared");
                    handle.cancel.cancel();
                    return None;
                }
                let requested = handle.stop_requested;
                handle.finish(ProcessState::Exited(exit));
                info!(role = %role, exit = %exit, requested, "Process exited");
                Some(SupervisorEvent::Exited {
                    role,
                    exit,
                    requested,
                })
            }

            ProcessEvent::StopDeadline { .. } => {
                if handle.state != ProcessState::Running {
                    return None;
                }
                let grace_ms = self.settings.grace_period.as_millis() as u64;
                warn!(
                    role = %role,
                    pid = ?handle.pid,
                    grace_ms,
                    "No exit within grace period; clearing local state"
                );
                handle.finish(ProcessState::Killed);
                Some(SupervisorEvent::TerminationTimeout {
                    role,
                    error: BridgeError::TerminationTimeout {
                        role: role.to_string(),
                        grace_ms,
                    },
                })
            }
        }
    }

    pub fn handle(&self, role: Role) -> Option<&ProcessHandle> {
        self.handles.get(&role)
    }

    pub fn state(&self, role: Role) -> Option<&ProcessState> {
        self.handles.get(&role).map(ProcessHandle::state)
    }

    pub fn is_live(&self, role: Role) -> bool {
        self.handles.get(&role).is_some_and(ProcessHandle::is_live)
    }

    pub fn is_running(&self, role: Role) -> bool {
        self.state(role) == Some(&ProcessState::Running)
    }

    /// Number of handles in Starting or Running
    pub fn live_count(&self) -> usize {
        self.handles.values().filter(|h| h.is_live()).count()
    }

    /// Stdin queue of `role`, present only while it is Running with stdin open
    pub fn input(&self, role: Role) -> Option<&mpsc::UnboundedSender<String>> {
        self.handles.get(&role).and_then(ProcessHandle::input)
    }
}

/// Everything the launch task needs, moved off the supervisor
struct LaunchJob {
    role: Role,
    generation: u64,
    args: Vec<String>,
    settings: SupervisorSettings,
    locator: Arc<dyn BinaryLocator>,
    reclaimer: Arc<dyn PortReclaimer>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
}

impl LaunchJob {
    async fn run(self) {
        let role = self.role;
        let spec = match self.locate().await {
            Some(Ok(spec)) => spec,
            Some(Err(error)) => return self.report(Err(error)),
            None => return,
        };

        if !spec.program.exists() {
            return self.report(Err(BridgeError::ExecutableNotFound {
                role: role.to_string(),
                path: spec.program,
            }));
        }

        if role == Role::Server && !self.settings.server_ports.is_empty() {
            let reclaimer = self.reclaimer.clone();
            let ports = self.settings.server_ports.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || reclaim_ports(reclaimer.as_ref(), &ports)).await
            {
                warn!(role = %role, error = %e, "Port reclamation task failed");
            }
        }

        if self.cancel.is_cancelled() {
            debug!(role = %role, "Launch cancelled before spawn");
            return;
        }

        self.spawn(spec);
    }

    /// Poll the locator, waiting out `Pending` answers; `None` if cancelled
    async fn locate(&self) -> Option<Result<LaunchSpec>> {
        let attempts = self.settings.locate_retry_attempts;

        for attempt in 1..=attempts {
            match self.locator.locate(self.role) {
                Locate::Ready(spec) => return Some(Ok(spec)),
                Locate::Pending => {
                    debug!(role = %self.role, attempt, attempts, "Executable location pending");
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.settings.locate_retry_interval) => {}
                }
            }
        }

        Some(Err(BridgeError::ExecutableNotReady {
            role: self.role.to_string(),
            attempts,
        }))
    }

    fn spawn(self, spec: LaunchSpec) {
        let role = self.role;
        let generation = self.generation;

        let mut command = Command::new(&spec.program);
        command
            .args(spec.arguments(&self.args))
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return self.report(Err(BridgeError::SpawnFailure {
                    role: role.to_string(),
                    source,
                }));
            }
        };

        let pid = match child_pid(&mut child, role) {
            Ok(pid) => pid,
            Err(error) => return self.report(Err(error)),
        };

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let spawned = ProcessEvent::Spawned {
            role,
            generation,
            result: Ok(SpawnedChild {
                pid,
                input: input_tx,
            }),
        };
        // Sent before any reader starts so Started precedes the first line
        if self.events.send(spawned).is_err() {
            warn!(role = %role, pid, "Supervisor gone; killing orphaned child");
            let _ = child.start_kill();
            return;
        }
        debug!(role = %role, pid, program = %spec.program.display(), "Spawned");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(io::read_lines(
                role,
                generation,
                StreamKind::Stdout,
                stdout,
                self.events.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(io::read_lines(
                role,
                generation,
                StreamKind::Stderr,
                stderr,
                self.events.clone(),
            )));
        }
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(io::write_lines(role, stdin, input_rx, self.cancel.clone()));
        }

        tokio::spawn(io::watch_exit(
            role,
            generation,
            child,
            readers,
            self.settings.drain_timeout,
            self.events,
        ));
    }

    fn report(self, result: Result<SpawnedChild>) {
        let _ = self.events.send(ProcessEvent::Spawned {
            role: self.role,
            generation: self.generation,
            result,
        });
    }
}

/// Pid of a freshly spawned child; a child without one is killed, not leaked
fn child_pid(child: &mut Child, role: Role) -> Result<u32> {
    match child.id() {
        Some(pid) => Ok(pid),
        None => {
            if let Err(e) = child.start_kill() {
                debug!(role = %role, error = %e, "Kill of pid-less child failed");
            }
            Err(BridgeError::internal(format!(
                "{} exited before its pid was read",
                role
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct PendingLocator;

    impl BinaryLocator for PendingLocator {
        fn locate(&self, _role: Role) -> Locate {
            Locate::Pending
        }
    }

    struct FixedLocator(LaunchSpec);

    impl BinaryLocator for FixedLocator {
        fn locate(&self, _role: Role) -> Locate {
            Locate::Ready(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingKiller {
        pids: Mutex<Vec<u32>>,
    }

    impl TreeKiller for RecordingKiller {
        fn terminate_tree(&self, pid: u32) -> std::io::Result<()> {
            self.pids.lock().unwrap().push(pid);
            Ok(())
        }
    }

    struct NoopReclaimer;

    impl PortReclaimer for NoopReclaimer {
        fn reclaim(&self, _port: u16) -> std::io::Result<Vec<u32>> {
            Ok(Vec::new())
        }
    }

    /// Records each reclaimed port and whether `marker` existed at the time
    struct RecordingReclaimer {
        marker: PathBuf,
        calls: Mutex<Vec<(u16, bool)>>,
    }

    impl RecordingReclaimer {
        fn new(marker: PathBuf) -> Self {
            Self {
                marker,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(u16, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PortReclaimer for RecordingReclaimer {
        fn reclaim(&self, port: u16) -> std::io::Result<Vec<u32>> {
            self.calls
                .lock()
                .unwrap()
                .push((port, self.marker.exists()));
            Ok(Vec::new())
        }
    }

    fn fast_settings() -> SupervisorSettings {
        SupervisorSettings {
            grace_period: Duration::from_millis(100),
            locate_retry_interval: Duration::from_millis(10),
            locate_retry_attempts: 3,
            drain_timeout: Duration::from_millis(200),
            server_ports: Vec::new(),
        }
    }

    /// Keeps the launch task pending for the whole test
    fn never_ready_settings() -> SupervisorSettings {
        SupervisorSettings {
            locate_retry_attempts: u32::MAX,
            ..fast_settings()
        }
    }

    fn supervisor_with(
        settings: SupervisorSettings,
        locator: Arc<dyn BinaryLocator>,
    ) -> (ProcessSupervisor, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sup = ProcessSupervisor::new(settings, locator, tx)
            .with_port_reclaimer(Arc::new(NoopReclaimer));
        (sup, rx)
    }

    fn supervisor(
        locator: Arc<dyn BinaryLocator>,
    ) -> (ProcessSupervisor, mpsc::UnboundedReceiver<ProcessEvent>) {
        supervisor_with(fast_settings(), locator)
    }

    /// Feed events into the supervisor until `pred` matches an upward event
    async fn pump_until<F>(
        sup: &mut ProcessSupervisor,
        rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
        mut pred: F,
    ) -> SupervisorEvent
    where
        F: FnMut(&SupervisorEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if let Some(up) = sup.handle_event(event) {
                    if pred(&up) {
                        return up;
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for supervisor event")
    }

    // ==================== Start Tests ====================

    #[tokio::test]
    async fn test_second_start_rejected_while_starting() {
        let (mut sup, _rx) = supervisor(Arc::new(PendingLocator));

        assert!(sup.start(Role::Server, vec![]).is_ok());
        let second = sup.start(Role::Server, vec![]);

        assert!(matches!(second, Err(BridgeError::AlreadyRunning { .. })));
        assert_eq!(sup.state(Role::Server), Some(&ProcessState::Starting));
        assert_eq!(sup.live_count(), 1);
    }

    #[tokio::test]
    async fn test_roles_are_independent() {
        let (mut sup, _rx) = supervisor(Arc::new(PendingLocator));

        assert!(sup.start(Role::Server, vec![]).is_ok());
        assert!(sup.start(Role::Client, vec![]).is_ok());
        assert_eq!(sup.live_count(), 2);
    }

    #[tokio::test]
    async fn test_pending_locator_gives_up() {
        let (mut sup, mut rx) = supervisor(Arc::new(PendingLocator));
        sup.start(Role::Client, vec![]).unwrap();

        let event = pump_until(&mut sup, &mut rx, |_| true).await;
        match event {
            SupervisorEvent::StartFailed { role, error } => {
                assert_eq!(role, Role::Client);
                assert!(matches!(
                    error,
                    BridgeError::ExecutableNotReady { attempts: 3, .. }
                ));
                assert!(error.is_blocking());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!sup.is_live(Role::Client));
    }

    #[tokio::test]
    async fn test_missing_executable_not_spawned() {
        let spec = LaunchSpec::new("/definitely/not/here/server");
        let (mut sup, mut rx) = supervisor(Arc::new(FixedLocator(spec)));
        sup.start(Role::Server, vec![]).unwrap();

        let event = pump_until(&mut sup, &mut rx, |_| true).await;
        assert!(matches!(
            event,
            SupervisorEvent::StartFailed {
                error: BridgeError::ExecutableNotFound { .. },
                ..
            }
        ));
        let handle = sup.handle(Role::Server).unwrap();
        assert!(handle.pid().is_none());
        assert!(handle.failure().is_some());
        assert_eq!(
            handle.state(),
            &ProcessState::Exited(ExitInfo::default())
        );
    }

    #[tokio::test]
    async fn test_restart_after_failure_gets_new_generation() {
        let (mut sup, mut rx) = supervisor(Arc::new(PendingLocator));
        let first = sup.start(Role::Client, vec![]).unwrap();
        pump_until(&mut sup, &mut rx, |_| true).await;

        let second = sup.start(Role::Client, vec![]).unwrap();
        assert!(second > first);
    }

    // ==================== Stale Event Tests ====================

    #[tokio::test]
    async fn test_stale_events_dropped() {
        let (mut sup, _rx) = supervisor_with(never_ready_settings(), Arc::new(PendingLocator));
        let generation = sup.start(Role::Client, vec![]).unwrap();

        let stale = ProcessEvent::Line {
            role: Role::Client,
            generation: generation + 100,
            stream: StreamKind::Stdout,
            line: "hello".into(),
        };
        assert!(sup.handle_event(stale).is_none());

        let current = ProcessEvent::Line {
            role: Role::Client,
            generation,
            stream: StreamKind::Stdout,
            line: "hello".into(),
        };
        assert!(matches!(
            sup.handle_event(current),
            Some(SupervisorEvent::Line { .. })
        ));
    }

    // ==================== Stop Tests ====================

    #[tokio::test]
    async fn test_stop_without_handle() {
        let (mut sup, _rx) = supervisor(Arc::new(PendingLocator));
        assert_eq!(sup.stop(Role::Server), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_while_starting_kills_late_child() {
        let killer = Arc::new(RecordingKiller::default());
        let (sup, _rx) = supervisor_with(never_ready_settings(), Arc::new(PendingLocator));
        let mut sup = sup.with_tree_killer(killer.clone());
        let generation = sup.start(Role::Client, vec![]).unwrap();

        assert_eq!(sup.stop(Role::Client), StopOutcome::Cancelled);
        assert_eq!(sup.state(Role::Client), Some(&ProcessState::Killed));

        // A child that finishes spawning afterwards is terminated, not adopted
        let (input, _input_rx) = mpsc::unbounded_channel();
        let late = ProcessEvent::Spawned {
            role: Role::Client,
            generation,
            result: Ok(SpawnedChild { pid: 4242, input }),
        };
        assert!(sup.handle_event(late).is_none());
        assert_eq!(*killer.pids.lock().unwrap(), vec![4242]);
        assert_eq!(sup.state(Role::Client), Some(&ProcessState::Killed));
        assert!(sup.input(Role::Client).is_none());
    }

    #[tokio::test]
    async fn test_stop_running_then_timeout_force_clears() {
        let killer = Arc::new(RecordingKiller::default());
        let (sup, mut rx) = supervisor_with(never_ready_settings(), Arc::new(PendingLocator));
        let mut sup = sup.with_tree_killer(killer.clone());
        let generation = sup.start(Role::Server, vec![]).unwrap();

        let (input, _input_rx) = mpsc::unbounded_channel();
        let spawned = ProcessEvent::Spawned {
            role: Role::Server,
            generation,
            result: Ok(SpawnedChild { pid: 999, input }),
        };
        assert!(matches!(
            sup.handle_event(spawned),
            Some(SupervisorEvent::Started { pid: 999, .. })
        ));

        assert_eq!(sup.stop(Role::Server), StopOutcome::Terminating);
        assert_eq!(*killer.pids.lock().unwrap(), vec![999]);
        // Second stop does not signal again
        assert_eq!(sup.stop(Role::Server), StopOutcome::Terminating);
        assert_eq!(killer.pids.lock().unwrap().len(), 1);

        // The recording killer never kills anything, so the deadline fires
        let event = pump_until(&mut sup, &mut rx, |e| {
            matches!(e, SupervisorEvent::TerminationTimeout { .. })
        })
        .await;
        if let SupervisorEvent::TerminationTimeout { error, .. } = event {
            assert!(matches!(
                error,
                BridgeError::TerminationTimeout { grace_ms: 100, .. }
            ));
        }
        assert_eq!(sup.state(Role::Server), Some(&ProcessState::Killed));

        // A real exit arriving afterwards changes nothing
        let late_exit = ProcessEvent::Exited {
            role: Role::Server,
            generation,
            exit: ExitInfo::with_code(0),
        };
        assert!(sup.handle_event(late_exit).is_none());
    }

    #[tokio::test]
    async fn test_exit_after_stop_is_requested() {
        let (sup, _rx) = supervisor_with(never_ready_settings(), Arc::new(PendingLocator));
        let mut sup = sup.with_tree_killer(Arc::new(RecordingKiller::default()));
        let generation = sup.start(Role::Client, vec![]).unwrap();

        let (input, _input_rx) = mpsc::unbounded_channel();
        sup.handle_event(ProcessEvent::Spawned {
            role: Role::Client,
            generation,
            result: Ok(SpawnedChild { pid: 5, input }),
        });
        sup.stop(Role::Client);

        let exit = sup.handle_event(ProcessEvent::Exited {
            role: Role::Client,
            generation,
            exit: ExitInfo {
                code: None,
                signal: Some(15),
            },
        });
        assert!(matches!(
            exit,
            Some(SupervisorEvent::Exited {
                requested: true,
                ..
            })
        ));
        assert!(!sup.is_live(Role::Client));
    }

    // ==================== Port Reclamation Tests ====================

    /// Launches `sh -c 'touch <marker>'` for either role with two server ports
    #[cfg(unix)]
    fn marker_supervisor(
        marker: &std::path::Path,
        reclaimer: Arc<RecordingReclaimer>,
    ) -> (ProcessSupervisor, mpsc::UnboundedReceiver<ProcessEvent>) {
        let spec = LaunchSpec::new("/bin/sh")
            .with_leading_arg("-c")
            .with_leading_arg(format!("touch '{}'", marker.display()));
        let settings = SupervisorSettings {
            server_ports: vec![6000, 6001],
            ..fast_settings()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let sup = ProcessSupervisor::new(settings, Arc::new(FixedLocator(spec)), tx)
            .with_port_reclaimer(reclaimer);
        (sup, rx)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_reclaims_ports_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let reclaimer = Arc::new(RecordingReclaimer::new(marker.clone()));
        let (mut sup, mut rx) = marker_supervisor(&marker, reclaimer.clone());
        sup.start(Role::Server, vec![]).unwrap();

        pump_until(&mut sup, &mut rx, |e| {
            matches!(e, SupervisorEvent::Exited { .. })
        })
        .await;

        assert!(marker.exists());
        assert_eq!(reclaimer.calls(), vec![(6000, false), (6001, false)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_never_reclaims_ports() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let reclaimer = Arc::new(RecordingReclaimer::new(marker.clone()));
        let (mut sup, mut rx) = marker_supervisor(&marker, reclaimer.clone());
        sup.start(Role::Client, vec![]).unwrap();

        pump_until(&mut sup, &mut rx, |e| {
            matches!(e, SupervisorEvent::Exited { .. })
        })
        .await;

        assert!(marker.exists());
        assert!(reclaimer.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_without_pid_is_reported() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        child.wait().await.unwrap();

        let result = child_pid(&mut child, Role::Client);
        assert!(matches!(result, Err(BridgeError::Internal(_))));
    }

    // ==================== Spawn Tests ====================

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_runs_leading_and_caller_args() {
        let spec = LaunchSpec::new("/bin/sh")
            .with_leading_arg("-c")
            .with_leading_arg("echo \"$1|$2\"; echo \"$GREETING\" >&2")
            .with_leading_arg("sh")
            .with_env("GREETING", "privet");
        let (mut sup, mut rx) = supervisor(Arc::new(FixedLocator(spec)));
        sup.start(Role::Client, vec!["10.0.0.1".into(), "alice".into()])
            .unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut started = false;
        let exit = pump_until(&mut sup, &mut rx, |e| match e {
            SupervisorEvent::Started { .. } => {
                started = true;
                false
            }
            SupervisorEvent::Line { stream, line, .. } => {
                match stream {
                    StreamKind::Stdout => stdout.push(line.clone()),
                    StreamKind::Stderr => stderr.push(line.clone()),
                }
                false
            }
            SupervisorEvent::Exited { .. } => true,
            _ => false,
        })
        .await;

        assert!(started);
        assert_eq!(stdout, vec!["10.0.0.1|alice"]);
        assert_eq!(stderr, vec!["privet"]);
        assert!(matches!(
            exit,
            SupervisorEvent::Exited {
                requested: false,
                ..
            }
        ));
        if let SupervisorEvent::Exited { exit, .. } = exit {
            assert!(exit.is_success());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_reaches_child_stdin() {
        let spec = LaunchSpec::new("/bin/sh")
            .with_leading_arg("-c")
            .with_leading_arg("read line; echo \"got:$line\"");
        let (mut sup, mut rx) = supervisor(Arc::new(FixedLocator(spec)));
        sup.start(Role::Client, vec![]).unwrap();

        pump_until(&mut sup, &mut rx, |e| {
            matches!(e, SupervisorEvent::Started { .. })
        })
        .await;
        sup.input(Role::Client)
            .expect("client should be running")
            .send("/voice".into())
            .unwrap();

        let line = pump_until(&mut sup, &mut rx, |e| {
            matches!(e, SupervisorEvent::Line { .. })
        })
        .await;
        match line {
            SupervisorEvent::Line { line, .. } => assert_eq!(line, "got:/voice"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_stop_reports_requested_exit() {
        let spec = LaunchSpec::new("/bin/sh")
            .with_leading_arg("-c")
            .with_leading_arg("sleep 30");
        let settings = SupervisorSettings {
            grace_period: Duration::from_secs(3),
            ..fast_settings()
        };
        let (mut sup, mut rx) = supervisor_with(settings, Arc::new(FixedLocator(spec)));
        sup.start(Role::Server, vec![]).unwrap();

        pump_until(&mut sup, &mut rx, |e| {
            matches!(e, SupervisorEvent::Started { .. })
        })
        .await;
        assert_eq!(sup.stop(Role::Server), StopOutcome::Terminating);

        let exit = pump_until(&mut sup, &mut rx, |e| {
            matches!(
                e,
                SupervisorEvent::Exited { .. } | SupervisorEvent::TerminationTimeout { .. }
            )
        })
        .await;
        assert!(matches!(
            exit,
            SupervisorEvent::Exited {
                requested: true,
                ..
            }
        ));
    }
}
