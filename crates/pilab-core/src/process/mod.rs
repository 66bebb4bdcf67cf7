//! Child process seam.
//!
//! The supervisor drives experiments through [`Launcher`] and
//! [`ChildProcess`] so the stop protocol can be exercised against fakes
//! that record every signal. [`SubprocessLauncher`] is the real backend.

pub mod subprocess;

use std::fmt;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::catalog::CatalogEntry;

pub use subprocess::{SubprocessChild, SubprocessLauncher};

/// Lines of combined stdout/stderr from a child, ending when both close.
pub type OutputLines = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Signals used by the stop protocol, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StopSignal {
    Interrupt,
    Terminate,
    Kill,
}

impl StopSignal {
    #[cfg(unix)]
    pub fn as_raw(self) -> libc::c_int {
        match self {
            StopSignal::Interrupt => libc::SIGINT,
            StopSignal::Terminate => libc::SIGTERM,
            StopSignal::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Kill => "SIGKILL",
        };
        f.write_str(name)
    }
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal number, if the child was killed by one.
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// A launched experiment.
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process id while the child has not been reaped.
    fn pid(&self) -> Option<u32>;

    /// Take the output stream. Returns `None` after the first call.
    fn take_output(&mut self) -> Option<OutputLines>;

    /// Deliver a stop signal. A child that already exited is not an error.
    fn signal(&mut self, signal: StopSignal) -> Result<()>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> Result<Option<ExitInfo>>;

    /// Wait until the child exits.
    async fn wait(&mut self) -> Result<ExitInfo>;
}

/// Starts experiments.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, entry: &CatalogEntry) -> Result<Box<dyn ChildProcess>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Launcher, _: &dyn ChildProcess) {}
};
