//! Typed results of supervisor operations.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::ChildState;
use crate::catalog::ExperimentId;
use crate::cleanup::CleanupReport;
use crate::process::{ExitInfo, StopSignal};

/// Why an experiment could not be started. The supervisor stays idle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("experiment {0} is already running; stop it first")]
    AlreadyRunning(ExperimentId),

    #[error("experiment {0} is not in the catalog")]
    UnknownExperiment(ExperimentId),

    #[error("experiment {id}: {} not found", path.display())]
    MissingExecutable { id: ExperimentId, path: PathBuf },

    #[error("failed to start experiment {id}: {message}")]
    Spawn { id: ExperimentId, message: String },
}

/// How the child ended during a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopOutcome {
    /// There was no child to stop.
    NotRunning,
    /// The child had already exited before any signal was sent.
    AlreadyExited(ExitInfo),
    /// The child exited after `after`.
    Exited { after: StopSignal, exit: ExitInfo },
    /// The child only went away after SIGKILL.
    Killed(ExitInfo),
    /// SIGKILL was sent but the exit could not be confirmed.
    KillFailed { message: String },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NotRunning => f.write_str("nothing running"),
            StopOutcome::AlreadyExited(exit) => write!(f, "had already exited ({exit})"),
            StopOutcome::Exited { after, exit } => write!(f, "exited after {after} ({exit})"),
            StopOutcome::Killed(exit) => write!(f, "force killed ({exit})"),
            StopOutcome::KillFailed { message } => write!(f, "kill failed: {message}"),
        }
    }
}

/// Everything that happened during one `stop()`.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub experiment: Option<ExperimentId>,
    pub outcome: StopOutcome,
    /// Signals delivered, in order.
    pub signals_sent: Vec<StopSignal>,
    /// Delivery failures, recorded and otherwise ignored.
    pub signal_errors: Vec<String>,
    /// `None` only when there was nothing to stop.
    pub cleanup: Option<CleanupReport>,
}

impl StopReport {
    pub(crate) fn not_running() -> Self {
        Self {
            experiment: None,
            outcome: StopOutcome::NotRunning,
            signals_sent: Vec::new(),
            signal_errors: Vec::new(),
            cleanup: None,
        }
    }

    pub fn stopped_anything(&self) -> bool {
        self.outcome != StopOutcome::NotRunning
    }
}

/// Result of a stop-then-start transition (cycle, restart, select).
#[derive(Debug, Clone)]
pub struct TransitionReport {
    pub stopped: StopReport,
    pub started: Result<ExperimentId, LaunchError>,
}

/// Snapshot printed by the `s` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub selected: ExperimentId,
    pub name: String,
    pub state: ChildState,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    pub last_exit: Option<ExitInfo>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self.state == ChildState::Running;
        writeln!(f, "Status: {}", if running { "running" } else { "stopped" })?;
        write!(f, "Current: experiment {} - {}", self.selected, self.name)?;
        if let Some(pid) = self.pid {
            write!(f, "\nPid: {pid}")?;
        }
        if let Some(uptime) = self.uptime {
            write!(f, "\nUptime: {}s", uptime.as_secs())?;
        }
        if let (false, Some(exit)) = (running, self.last_exit) {
            write!(f, "\nLast exit: {exit}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_shows_pid_and_uptime_when_running() {
        let status = StatusReport {
            selected: ExperimentId::OledCalculator,
            name: "OLED Calculator with LED Strip".to_string(),
            state: ChildState::Running,
            pid: Some(4242),
            uptime: Some(Duration::from_millis(12_500)),
            last_exit: None,
        };
        assert_eq!(
            status.to_string(),
            "Status: running\n\
             Current: experiment 2 - OLED Calculator with LED Strip\n\
             Pid: 4242\n\
             Uptime: 12s"
        );
    }

    #[test]
    fn status_shows_last_exit_when_stopped() {
        let status = StatusReport {
            selected: ExperimentId::LedLottery,
            name: "LED Color Lottery System".to_string(),
            state: ChildState::Idle,
            pid: None,
            uptime: None,
            last_exit: Some(ExitInfo::code(1)),
        };
        let text = status.to_string();
        assert!(text.starts_with("Status: stopped\n"));
        assert!(text.ends_with("Last exit: exit code 1"));
    }

    #[test]
    fn launch_errors_name_the_experiment() {
        let err = LaunchError::MissingExecutable {
            id: ExperimentId::ToffoliGate,
            path: PathBuf::from("/lab/ex3.py"),
        };
        assert_eq!(err.to_string(), "experiment 3: /lab/ex3.py not found");
    }
}
