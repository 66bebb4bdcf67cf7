//! Experiments as OS processes.
//!
//! The command line is `[elevate] [interpreter] <program>`, e.g.
//! `sudo venv/bin/python ex1.py`. Elevation is needed for GPIO/I2C access
//! on the Pi and is optional elsewhere.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use super::{ChildProcess, ExitInfo, Launcher, OutputLines, StopSignal};
use crate::catalog::CatalogEntry;

/// [`Launcher`] that spawns each experiment as a subprocess.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    working_dir: PathBuf,
    interpreter: Option<PathBuf>,
    elevate: Option<String>,
}

impl SubprocessLauncher {
    /// Run programs directly, without elevation, in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            interpreter: None,
            elevate: None,
        }
    }

    /// Run each program through an interpreter (e.g. a venv's python).
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Prefix the command with an elevation program such as `sudo`.
    pub fn with_elevation(mut self, program: impl Into<String>) -> Self {
        self.elevate = Some(program.into());
        self
    }

    /// The program to execute and its arguments.
    pub fn command_line(&self, program: &Path) -> (OsString, Vec<OsString>) {
        let mut parts: Vec<OsString> = Vec::with_capacity(3);
        if let Some(ref elevate) = self.elevate {
            parts.push(elevate.into());
        }
        if let Some(ref interpreter) = self.interpreter {
            parts.push(interpreter.into());
        }
        parts.push(program.into());
        let head = parts.remove(0);
        (head, parts)
    }
}

#[async_trait]
impl Launcher for SubprocessLauncher {
    async fn launch(&self, entry: &CatalogEntry) -> Result<Box<dyn ChildProcess>> {
        let (program, args) = self.command_line(&entry.program);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&self.working_dir)
            // Python block-buffers stdout when it is a pipe.
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: a terminal Ctrl+C reaches only the supervisor,
        // which then runs the stop protocol itself.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {} for experiment {}",
                program.to_string_lossy(),
                entry.id
            )
        })?;

        let mut sources = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            sources.push(read_lines(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            sources.push(read_lines(stderr));
        }

        debug!(
            experiment = %entry.id,
            pid = ?child.id(),
            program = %program.to_string_lossy(),
            "spawned experiment"
        );

        Ok(Box::new(SubprocessChild {
            child,
            output: Some(merge_lines(sources)),
        }))
    }
}

fn read_lines<R>(reader: R) -> OutputLines
where
    R: AsyncRead + Send + Unpin + 'static,
{
    until_error(LinesStream::new(BufReader::new(reader).lines()))
}

/// Yield lines until the source ends or fails; a read error is logged and
/// ends that source.
fn until_error<S>(mut source: S) -> OutputLines
where
    S: Stream<Item = io::Result<String>> + Send + Unpin + 'static,
{
    Box::pin(async_stream::stream! {
        while let Some(line) = source.next().await {
            match line {
                Ok(line) => yield line,
                Err(e) => {
                    warn!(error = %e, "error reading experiment output");
                    break;
                }
            }
        }
    })
}

/// Interleave sources in arrival order.
fn merge_lines(sources: Vec<OutputLines>) -> OutputLines {
    Box::pin(futures::stream::select_all(sources))
}

/// A running subprocess.
pub struct SubprocessChild {
    child: Child,
    output: Option<OutputLines>,
}

impl std::fmt::Debug for SubprocessChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessChild")
            .field("pid", &self.child.id())
            .field("output_taken", &self.output.is_none())
            .finish()
    }
}

#[async_trait]
impl ChildProcess for SubprocessChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    fn signal(&mut self, signal: StopSignal) -> Result<()> {
        // `id()` is `None` once the child has been reaped; the pid may have
        // been reused by then, so never signal it.
        let Some(pid) = self.child.id() else {
            debug!(%signal, "child already reaped; not signalling");
            return Ok(());
        };

        if signal == StopSignal::Kill {
            return self
                .child
                .start_kill()
                .with_context(|| format!("failed to send SIGKILL to pid {pid}"));
        }

        send_signal(pid, signal)
    }

    fn try_wait(&mut self) -> Result<Option<ExitInfo>> {
        let status = self
            .child
            .try_wait()
            .context("failed to poll experiment process")?;
        Ok(status.map(ExitInfo::from))
    }

    async fn wait(&mut self) -> Result<ExitInfo> {
        let status = self
            .child
            .wait()
            .await
            .context("failed to wait for experiment process")?;
        Ok(ExitInfo::from(status))
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    // SAFETY: pid belongs to a child we spawned and have not reaped.
    let ret = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
    if ret == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(pid, %signal, "process already gone");
        return Ok(());
    }
    Err(err).with_context(|| format!("failed to send {signal} to pid {pid}"))
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    anyhow::bail!("cannot send {signal} to pid {pid}: signals are unix-only")
}
