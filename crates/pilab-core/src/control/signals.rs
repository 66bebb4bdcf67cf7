//! OS signal handling.
//!
//! Unix: SIGINT, SIGTERM and SIGQUIT all request shutdown. Elsewhere only
//! Ctrl-C is handled.

use std::sync::Arc;

use tracing::warn;

use super::{ExitReason, Requests};
use crate::console::Console;

/// Termination signal listeners, installed once for the process lifetime.
#[cfg(unix)]
pub struct ShutdownSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(not(unix))]
pub struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c listener failed");
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    }
}

/// Turn termination signals into exit requests for as long as the process
/// lives. The first signal starts shutdown; later ones are logged and
/// ignored so the stop protocol runs to completion.
pub async fn forward_signals(mut signals: ShutdownSignals, requests: Requests, console: Arc<dyn Console>) {
    loop {
        let name = signals.recv().await;
        if requests.exit(ExitReason::Signal).await {
            console.line(&format!("Received {name}, initiating graceful shutdown..."));
        } else {
            warn!(signal = name, "shutdown already in progress; ignoring signal");
        }
    }
}
