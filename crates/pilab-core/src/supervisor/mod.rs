//! The experiment supervisor.
//!
//! Owns at most one child experiment and every transition between
//! experiments. It is driven by exactly one task (see
//! [`crate::control::run_controller`]), so its methods take `&mut self` and
//! never race each other.

pub mod report;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use pilab_hw::Hardware;

use crate::catalog::{Catalog, ExperimentId};
use crate::cleanup::{self, CleanupReport, StepStatus};
use crate::console::Console;
use crate::process::{ChildProcess, ExitInfo, Launcher, OutputLines, StopSignal};

pub use report::{LaunchError, StatusReport, StopOutcome, StopReport, TransitionReport};
pub use state::ChildState;

/// How long each stop stage waits for the child to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimeouts {
    /// After SIGINT, for the child's own cleanup.
    pub graceful: Duration,
    /// After SIGTERM, and again after SIGKILL.
    pub forced: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            graceful: Duration::from_secs(10),
            forced: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub timeouts: StopTimeouts,
    /// Pause between stopping one experiment and starting the next.
    pub switch_delay: Duration,
    /// Upper bound on waiting for the output relay to drain after a stop.
    pub relay_flush: Duration,
    /// GPIO pins held by the supervisor itself (the button); emergency
    /// cleanup leaves them exported.
    pub reserved_pins: Vec<u8>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeouts: StopTimeouts::default(),
            switch_delay: Duration::from_secs(1),
            relay_flush: Duration::from_secs(1),
            reserved_pins: Vec::new(),
        }
    }
}

struct RunningChild {
    id: ExperimentId,
    process: Box<dyn ChildProcess>,
    relay: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
    started: Instant,
}

pub struct Supervisor {
    catalog: Arc<Catalog>,
    launcher: Arc<dyn Launcher>,
    hardware: Arc<dyn Hardware>,
    console: Arc<dyn Console>,
    config: SupervisorConfig,
    selected: ExperimentId,
    state: ChildState,
    child: Option<RunningChild>,
    last_exit: Option<ExitInfo>,
}

impl Supervisor {
    /// A supervisor with nothing running and the first catalog entry
    /// selected.
    pub fn new(
        catalog: Arc<Catalog>,
        launcher: Arc<dyn Launcher>,
        hardware: Arc<dyn Hardware>,
        console: Arc<dyn Console>,
        config: SupervisorConfig,
    ) -> Self {
        let selected = catalog.first();
        Self {
            catalog,
            launcher,
            hardware,
            console,
            config,
            selected,
            state: ChildState::Idle,
            child: None,
            last_exit: None,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn console(&self) -> Arc<dyn Console> {
        Arc::clone(&self.console)
    }

    pub fn selected(&self) -> ExperimentId {
        self.selected
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    /// True while a child handle is held, even if that child has crashed
    /// and not yet been stopped.
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.process.pid())
    }

    fn set_state(&mut self, to: ChildState) {
        if !ChildState::is_valid_transition(self.state, to) {
            warn!(from = %self.state, %to, "unexpected child state transition");
        }
        debug!(from = %self.state, %to, "child state");
        self.state = to;
    }

    /// Launch experiment `id` and start relaying its output.
    pub async fn start(&mut self, id: ExperimentId) -> Result<(), LaunchError> {
        if let Some(ref child) = self.child {
            return Err(LaunchError::AlreadyRunning(child.id));
        }
        self.set_state(ChildState::Starting);

        match self.launch(id).await {
            Ok(child) => {
                info!(
                    experiment = %id,
                    pid = ?child.process.pid(),
                    started_at = %child.started_at,
                    "experiment started"
                );
                self.console.line("Experiment started successfully");
                self.selected = id;
                self.child = Some(child);
                self.set_state(ChildState::Running);
                Ok(())
            }
            Err(e) => {
                warn!(experiment = %id, error = %e, "launch failed");
                self.set_state(ChildState::Idle);
                Err(e)
            }
        }
    }

    async fn launch(&self, id: ExperimentId) -> Result<RunningChild, LaunchError> {
        let entry = self
            .catalog
            .get(id)
            .ok_or(LaunchError::UnknownExperiment(id))?;
        if !entry.program.exists() {
            return Err(LaunchError::MissingExecutable {
                id,
                path: entry.program.clone(),
            });
        }

        self.console
            .line(&format!("Starting experiment {id}: {}", entry.name));
        self.console
            .line(&format!("Running: {}", entry.program.display()));

        let mut process = self
            .launcher
            .launch(entry)
            .await
            .map_err(|e| LaunchError::Spawn {
                id,
                message: format!("{e:#}"),
            })?;

        let relay = process
            .take_output()
            .map(|lines| spawn_relay(id, lines, Arc::clone(&self.console)));

        Ok(RunningChild {
            id,
            process,
            relay,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    /// Stop the running child, escalating SIGINT -> SIGTERM -> SIGKILL, then
    /// run emergency cleanup once. A no-op when nothing is running.
    pub async fn stop(&mut self) -> StopReport {
        let Some(mut child) = self.child.take() else {
            debug!("stop requested with no child");
            return StopReport::not_running();
        };

        let mut log = SignalLog::default();
        let outcome = self.terminate(child.process.as_mut(), &mut log).await;
        match &outcome {
            StopOutcome::AlreadyExited(exit)
            | StopOutcome::Exited { exit, .. }
            | StopOutcome::Killed(exit) => self.last_exit = Some(*exit),
            StopOutcome::KillFailed { .. } | StopOutcome::NotRunning => {}
        }

        if let Some(relay) = child.relay.take() {
            if timeout(self.config.relay_flush, relay).await.is_err() {
                debug!(experiment = %child.id, "output relay still draining; detached");
            }
        }
        drop(child.process);

        let cleanup = self.emergency_cleanup().await;
        self.set_state(ChildState::Idle);

        info!(experiment = %child.id, %outcome, "experiment stopped");
        Self::announce(&*self.console, &outcome);

        StopReport {
            experiment: Some(child.id),
            outcome,
            signals_sent: log.sent,
            signal_errors: log.errors,
            cleanup: Some(cleanup),
        }
    }

    async fn terminate(&mut self, process: &mut dyn ChildProcess, log: &mut SignalLog) -> StopOutcome {
        match process.try_wait() {
            Ok(Some(exit)) => {
                self.set_state(ChildState::Exited);
                return StopOutcome::AlreadyExited(exit);
            }
            Ok(None) => {}
            Err(e) => {
                let error = format!("{e:#}");
                warn!(%error, "could not poll child before stopping");
            }
        }

        let StopTimeouts { graceful, forced } = self.config.timeouts;

        self.set_state(ChildState::StoppingGraceful);
        self.console
            .line("Waiting for experiment to complete cleanup...");
        if let Some(exit) = signal_and_wait(process, StopSignal::Interrupt, graceful, log).await {
            self.set_state(ChildState::Exited);
            return StopOutcome::Exited {
                after: StopSignal::Interrupt,
                exit,
            };
        }

        self.set_state(ChildState::StoppingForced);
        self.console
            .line("Experiment did not respond to graceful shutdown, terminating...");
        if let Some(exit) = signal_and_wait(process, StopSignal::Terminate, forced, log).await {
            self.set_state(ChildState::Exited);
            return StopOutcome::Exited {
                after: StopSignal::Terminate,
                exit,
            };
        }

        self.console.line("Force killing unresponsive experiment...");
        let result = signal_and_wait(process, StopSignal::Kill, forced, log).await;
        self.set_state(ChildState::Killed);
        match result {
            Some(exit) => StopOutcome::Killed(exit),
            None => {
                let message = log
                    .errors
                    .last()
                    .cloned()
                    .unwrap_or_else(|| format!("no exit within {}s of SIGKILL", forced.as_secs()));
                warn!(%message, "could not confirm child was killed");
                StopOutcome::KillFailed { message }
            }
        }
    }

    fn announce(console: &dyn Console, outcome: &StopOutcome) {
        let text = match outcome {
            StopOutcome::NotRunning => return,
            StopOutcome::AlreadyExited(exit) => format!("Experiment had already exited ({exit})"),
            StopOutcome::Exited {
                after: StopSignal::Interrupt,
                ..
            } => "Experiment terminated gracefully".to_string(),
            StopOutcome::Exited { .. } => "Experiment terminated".to_string(),
            StopOutcome::Killed(_) => "Experiment force killed".to_string(),
            StopOutcome::KillFailed { message } => {
                format!("Could not kill experiment: {message}")
            }
        };
        console.line(&text);
    }

    /// Reset the LED strip and display and release GPIO pins other than the
    /// reserved ones.
    pub async fn emergency_cleanup(&self) -> CleanupReport {
        self.console.line("Performing emergency hardware cleanup...");
        let report =
            cleanup::emergency_cleanup(self.hardware.as_ref(), &self.config.reserved_pins).await;
        match report.outcome() {
            cleanup::CleanupOutcome::Clean => self.console.line("Emergency cleanup completed"),
            _ => self
                .console
                .line(&format!("Emergency cleanup incomplete: {report}")),
        }
        report
    }

    /// Release every GPIO pin, reserved ones included. Used once at exit.
    pub async fn release_pins(&self) -> StepStatus {
        cleanup::release_all_pins(self.hardware.as_ref()).await
    }

    /// Stop, pause, then start the next experiment in catalog order.
    pub async fn cycle(&mut self) -> TransitionReport {
        let next = self.catalog.next(self.selected);
        self.console.line("Switching experiments...");
        self.switch_to(next).await
    }

    /// Stop, pause, then start the selected experiment again.
    pub async fn restart(&mut self) -> TransitionReport {
        let current = self.selected;
        self.console
            .line(&format!("Restarting experiment {current}..."));
        self.switch_to(current).await
    }

    /// Switch to `id`. Returns `None` when `id` is already running.
    pub async fn select(&mut self, id: ExperimentId) -> Option<TransitionReport> {
        if self.live_child_id() == Some(id) {
            self.console
                .line(&format!("Experiment {id} is already running"));
            return None;
        }
        if !self.catalog.contains(id) {
            return Some(TransitionReport {
                stopped: StopReport::not_running(),
                started: Err(LaunchError::UnknownExperiment(id)),
            });
        }
        self.console.line(&format!("Switching to experiment {id}..."));
        Some(self.switch_to(id).await)
    }

    async fn switch_to(&mut self, id: ExperimentId) -> TransitionReport {
        let stopped = self.stop().await;
        self.selected = id;
        tokio::time::sleep(self.config.switch_delay).await;
        let started = self.start(id).await.map(|()| id);
        TransitionReport { stopped, started }
    }

    /// Id of the child if it has not exited yet. Records the exit of a
    /// child that ended on its own.
    fn live_child_id(&mut self) -> Option<ExperimentId> {
        let child = self.child.as_mut()?;
        match child.process.try_wait() {
            Ok(None) => Some(child.id),
            Ok(Some(exit)) => {
                if self.last_exit != Some(exit) {
                    info!(experiment = %child.id, %exit, "experiment exited on its own");
                }
                self.last_exit = Some(exit);
                None
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(%error, "could not poll child");
                Some(child.id)
            }
        }
    }

    /// Current state for the operator.
    pub fn status(&mut self) -> StatusReport {
        let live = self.live_child_id().is_some();
        let state = match (live, self.state) {
            (false, ChildState::Running) => ChildState::Exited,
            (_, state) => state,
        };
        let name = self
            .catalog
            .get(self.selected)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        let (pid, uptime) = match self.child {
            Some(ref child) if live => (child.process.pid(), Some(child.started.elapsed())),
            _ => (None, None),
        };
        StatusReport {
            selected: self.selected,
            name,
            state,
            pid,
            uptime,
            last_exit: self.last_exit,
        }
    }
}

#[derive(Default)]
struct SignalLog {
    sent: Vec<StopSignal>,
    errors: Vec<String>,
}

/// Send `signal` and wait up to `wait` for the child to exit. A delivery
/// failure is recorded and skips the wait.
async fn signal_and_wait(
    process: &mut dyn ChildProcess,
    signal: StopSignal,
    wait: Duration,
    log: &mut SignalLog,
) -> Option<ExitInfo> {
    match process.signal(signal) {
        Ok(()) => {
            info!(%signal, pid = ?process.pid(), "sent stop signal");
            log.sent.push(signal);
        }
        Err(e) => {
            let message = format!("{signal}: {e:#}");
            warn!(%message, "signal delivery failed");
            log.errors.push(message);
            return None;
        }
    }

    match timeout(wait, process.wait()).await {
        Ok(Ok(exit)) => Some(exit),
        Ok(Err(e)) => {
            let message = format!("waiting after {signal}: {e:#}");
            warn!(%message, "wait failed");
            log.errors.push(message);
            None
        }
        Err(_) => {
            warn!(%signal, timeout_secs = wait.as_secs_f64(), "child still running");
            None
        }
    }
}

fn spawn_relay(id: ExperimentId, mut lines: OutputLines, console: Arc<dyn Console>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            console.line(&format!("[EXP{}] {}", id.number(), line));
        }
        debug!(experiment = %id, "experiment output closed");
    })
}
