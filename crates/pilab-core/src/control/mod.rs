//! Request channel and the controller task.
//!
//! Every trigger (console, button, OS signal) holds a [`Requests`] handle.
//! The controller drains the channel and applies requests to the
//! [`Supervisor`] one at a time, in arrival order. The first exit request
//! sets the shutdown latch; once it is set, triggers can no longer queue
//! anything else.
//!
//! Console exits (`q`, end of input) are ordered behind the commands typed
//! before them. Signal and long-press exits preempt: requests still queued
//! ahead of them are discarded, so nothing new starts during teardown.

mod signals;

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::ExperimentId;
use crate::cleanup::{CleanupReport, StepStatus};
use crate::console::{self, Console};
use crate::supervisor::{StopReport, Supervisor, TransitionReport};

pub use signals::{ShutdownSignals, forward_signals};

const REQUEST_QUEUE: usize = 16;

/// What ended the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    /// `q` at the console.
    Quit,
    /// stdin closed.
    EndOfInput,
    /// Supervisor button held past the hold threshold.
    LongPress,
    /// SIGINT, SIGTERM or SIGQUIT.
    Signal,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::Quit => "quit",
            ExitReason::EndOfInput => "end of input",
            ExitReason::LongPress => "long press",
            ExitReason::Signal => "signal",
        };
        f.write_str(s)
    }
}

impl ExitReason {
    /// Whether requests queued ahead of this exit are discarded.
    pub fn preempts(self) -> bool {
        matches!(self, ExitReason::Signal | ExitReason::LongPress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Cycle,
    Restart,
    Select(ExperimentId),
    Status,
    Help,
    Unknown(String),
    Exit(ExitReason),
}

/// Sending half of the request channel, shared by all triggers.
#[derive(Debug, Clone)]
pub struct Requests {
    tx: mpsc::Sender<Request>,
    shutdown: CancellationToken,
    exit: Arc<OnceLock<ExitReason>>,
}

/// Receiving half of the request channel, owned by the controller.
#[derive(Debug)]
pub struct RequestQueue {
    rx: mpsc::Receiver<Request>,
    exit: Arc<OnceLock<ExitReason>>,
}

/// Create the request channel. `shutdown` is the latch set by the first
/// exit request.
pub fn channel(shutdown: CancellationToken) -> (Requests, RequestQueue) {
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    let exit = Arc::new(OnceLock::new());
    let requests = Requests {
        tx,
        shutdown,
        exit: Arc::clone(&exit),
    };
    (requests, RequestQueue { rx, exit })
}

impl RequestQueue {
    /// Next request, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Request> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Request, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// True once a preempting exit has been requested.
    pub fn preempted(&self) -> bool {
        self.exit.get().is_some_and(|reason| reason.preempts())
    }
}

impl Requests {
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queue a request. Returns `false` if it was dropped because shutdown
    /// has begun or the controller is gone.
    pub async fn send(&self, request: Request) -> bool {
        if let Request::Exit(reason) = request {
            return self.exit(reason).await;
        }
        if self.is_shutting_down() {
            debug!(?request, "shutting down; dropping request");
            return false;
        }
        self.tx.send(request).await.is_ok()
    }

    /// Set the shutdown latch and queue the exit. Only the first caller
    /// wins; later calls return `false` and change nothing.
    pub async fn exit(&self, reason: ExitReason) -> bool {
        if self.exit.set(reason).is_err() {
            debug!(%reason, "shutdown already in progress");
            return false;
        }
        info!(%reason, "shutdown requested");
        self.shutdown.cancel();
        if self.tx.send(Request::Exit(reason)).await.is_err() {
            debug!("controller already stopped");
        }
        true
    }
}

/// How the controller finished.
#[derive(Debug, Clone)]
pub struct ExitSummary {
    pub reason: ExitReason,
    /// The final stop of whatever was running.
    pub stop: StopReport,
    /// Hardware cleanup at exit: the stop's own pass, or a fresh one when
    /// nothing was running.
    pub cleanup: CleanupReport,
    /// The final release of every GPIO pin.
    pub release: StepStatus,
}

/// Apply requests to `supervisor` until an exit request arrives, then stop
/// the child, clean up the hardware, release all pins and return.
pub async fn run_controller(
    supervisor: &mut Supervisor,
    mut requests: RequestQueue,
    shutdown: CancellationToken,
) -> ExitSummary {
    let console = supervisor.console();

    let reason = loop {
        let Some(request) = requests.recv().await else {
            debug!("all request senders dropped");
            break ExitReason::EndOfInput;
        };

        match request {
            Request::Exit(reason) => break reason,
            _ if requests.preempted() => {
                debug!(?request, "shutdown pending; discarding queued request");
            }
            Request::Cycle => {
                let report = supervisor.cycle().await;
                announce_transition(&*console, &report);
                show_status(supervisor);
            }
            Request::Restart => {
                let report = supervisor.restart().await;
                announce_transition(&*console, &report);
                show_status(supervisor);
            }
            Request::Select(id) => {
                if let Some(report) = supervisor.select(id).await {
                    announce_transition(&*console, &report);
                    show_status(supervisor);
                }
            }
            Request::Status => show_status(supervisor),
            Request::Help => console.line(&console::help_text(supervisor.catalog())),
            Request::Unknown(input) => {
                console.line(&format!("Unknown command '{input}'. Use 'h' for help."));
            }
        }
    };

    shutdown.cancel();
    info!(%reason, "controller shutting down");
    console.line(&format!("Shutting down ({reason})..."));
    console.line("Performing final graceful shutdown...");

    let stop = supervisor.stop().await;
    let cleanup = match stop.cleanup {
        Some(ref report) => report.clone(),
        None => supervisor.emergency_cleanup().await,
    };
    let release = supervisor.release_pins().await;
    if let StepStatus::Failed(ref e) = release {
        console.line(&format!("GPIO release failed: {e}"));
    }
    console.line("Goodbye!");

    ExitSummary {
        reason,
        stop,
        cleanup,
        release,
    }
}

fn announce_transition(console: &dyn Console, report: &TransitionReport) {
    match &report.started {
        Ok(id) => console.line(&format!("Now running experiment {id}")),
        Err(e) => console.line(&format!("Failed to start experiment: {e}")),
    }
}

fn show_status(supervisor: &mut Supervisor) {
    let status = supervisor.status();
    supervisor.console().line(&status.to_string());
}
