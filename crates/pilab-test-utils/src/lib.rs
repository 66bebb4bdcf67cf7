//! Shared fakes for pilab integration tests.
//!
//! - [`FakeLauncher`] / [`FakeChild`]: children that record every signal
//!   with a tokio timestamp, so escalation timing can be checked on a
//!   paused clock.
//! - [`FakeHardware`]: counts cleanup work per device, with failure
//!   injection.
//! - [`ScriptedGpio`]: a button whose level follows a script over time.
//! - [`RecordingConsole`]: captures operator output.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::time::Instant;

use pilab_core::catalog::{Catalog, CatalogEntry, ExperimentId};
use pilab_core::console::Console;
use pilab_core::process::{ChildProcess, ExitInfo, Launcher, OutputLines, StopSignal};
use pilab_hw::{Bitmap, Color, Display, Gpio, Hardware, HardwareError, LedStrip, Level, Pull};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<String>>,
}

impl RecordingConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|l| l.contains(needle))
    }
}

impl Console for RecordingConsole {
    fn line(&self, text: &str) {
        lock(&self.lines).push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// How a fake child reacts to the stop protocol.
#[derive(Debug, Clone)]
pub struct ChildBehavior {
    /// Signals that make the child exit.
    pub exits_on: Vec<StopSignal>,
    /// Time between an effective signal and the exit.
    pub exit_delay: Duration,
    /// Every `signal()` call fails without reaching the child.
    pub fail_signals: bool,
    /// Exit with this code right after launch.
    pub crash_with: Option<i32>,
    pub output: Vec<String>,
}

impl Default for ChildBehavior {
    fn default() -> Self {
        Self {
            exits_on: vec![StopSignal::Interrupt, StopSignal::Terminate, StopSignal::Kill],
            exit_delay: Duration::ZERO,
            fail_signals: false,
            crash_with: None,
            output: Vec::new(),
        }
    }
}

impl ChildBehavior {
    /// Ignores SIGINT and SIGTERM.
    pub fn stubborn() -> Self {
        Self {
            exits_on: vec![StopSignal::Kill],
            ..Self::default()
        }
    }

    /// Survives even SIGKILL.
    pub fn unkillable() -> Self {
        Self {
            exits_on: Vec::new(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRecord {
    pub signal: StopSignal,
    pub at: Instant,
}

/// What happened to one launched child.
#[derive(Debug, Clone)]
pub struct ChildLog {
    pub experiment: ExperimentId,
    pub pid: u32,
    pub launched_at: Instant,
    /// Signals that reached the child.
    pub signals: Vec<SignalRecord>,
    /// Signals whose delivery failed.
    pub failed_signals: Vec<StopSignal>,
    pub exited: Option<ExitInfo>,
    /// The supervisor let go of the handle.
    pub dropped: bool,
}

impl ChildLog {
    pub fn is_live(&self) -> bool {
        self.exited.is_none() && !self.dropped
    }

    pub fn sent(&self) -> Vec<StopSignal> {
        self.signals.iter().map(|r| r.signal).collect()
    }

    pub fn count(&self, signal: StopSignal) -> usize {
        self.signals.iter().filter(|r| r.signal == signal).count()
    }
}

#[derive(Debug, Default)]
struct LauncherState {
    default: ChildBehavior,
    behaviors: HashMap<ExperimentId, ChildBehavior>,
    fail_launch: HashSet<ExperimentId>,
    children: Vec<Arc<Mutex<ChildLog>>>,
    overlapping: usize,
    next_pid: u32,
}

/// Launcher that hands out [`FakeChild`]ren and keeps their logs.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour of every experiment without an explicit one.
    pub fn set_default(&self, behavior: ChildBehavior) {
        lock(&self.state).default = behavior;
    }

    pub fn set_behavior(&self, id: ExperimentId, behavior: ChildBehavior) {
        lock(&self.state).behaviors.insert(id, behavior);
    }

    pub fn fail_launch(&self, id: ExperimentId) {
        lock(&self.state).fail_launch.insert(id);
    }

    /// Snapshot of every child in launch order.
    pub fn children(&self) -> Vec<ChildLog> {
        lock(&self.state)
            .children
            .iter()
            .map(|c| lock(c).clone())
            .collect()
    }

    pub fn child(&self, index: usize) -> ChildLog {
        self.children()
            .into_iter()
            .nth(index)
            .unwrap_or_else(|| panic!("no child #{index}"))
    }

    pub fn launches(&self) -> Vec<ExperimentId> {
        self.children().iter().map(|c| c.experiment).collect()
    }

    pub fn live_children(&self) -> usize {
        self.children().iter().filter(|c| c.is_live()).count()
    }

    /// Launches that happened while another child was still live.
    pub fn overlapping_launches(&self) -> usize {
        lock(&self.state).overlapping
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, entry: &CatalogEntry) -> Result<Box<dyn ChildProcess>> {
        let mut state = lock(&self.state);
        if state.fail_launch.contains(&entry.id) {
            bail!("permission denied: {}", entry.program.display());
        }
        if state.children.iter().any(|c| lock(c).is_live()) {
            state.overlapping += 1;
        }

        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        let behavior = state
            .behaviors
            .get(&entry.id)
            .cloned()
            .unwrap_or_else(|| state.default.clone());
        let now = Instant::now();
        let log = Arc::new(Mutex::new(ChildLog {
            experiment: entry.id,
            pid,
            launched_at: now,
            signals: Vec::new(),
            failed_signals: Vec::new(),
            exited: None,
            dropped: false,
        }));
        state.children.push(Arc::clone(&log));

        let exit_at = behavior.crash_with.map(|code| (now, ExitInfo::code(code)));
        let output: OutputLines = Box::pin(futures::stream::iter(behavior.output.clone()));
        Ok(Box::new(FakeChild {
            pid,
            behavior,
            log,
            exit_at,
            output: Some(output),
        }))
    }
}

pub struct FakeChild {
    pid: u32,
    behavior: ChildBehavior,
    log: Arc<Mutex<ChildLog>>,
    /// When the child will exit, once something has made it do so.
    exit_at: Option<(Instant, ExitInfo)>,
    output: Option<OutputLines>,
}

impl FakeChild {
    fn exited(&self) -> Option<ExitInfo> {
        lock(&self.log).exited
    }

    fn finish(&self, exit: ExitInfo) -> ExitInfo {
        lock(&self.log).exited = Some(exit);
        exit
    }
}

impl Drop for FakeChild {
    fn drop(&mut self) {
        lock(&self.log).dropped = true;
    }
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn pid(&self) -> Option<u32> {
        self.exited().is_none().then_some(self.pid)
    }

    fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    fn signal(&mut self, signal: StopSignal) -> Result<()> {
        if self.exited().is_some() {
            return Ok(());
        }
        if self.behavior.fail_signals {
            lock(&self.log).failed_signals.push(signal);
            return Err(anyhow!("EPERM: operation not permitted"));
        }

        let now = Instant::now();
        lock(&self.log).signals.push(SignalRecord { signal, at: now });
        if self.exit_at.is_none() && self.behavior.exits_on.contains(&signal) {
            let exit = match signal {
                StopSignal::Interrupt => ExitInfo::code(0),
                StopSignal::Terminate => ExitInfo::signaled(15),
                StopSignal::Kill => ExitInfo::signaled(9),
            };
            self.exit_at = Some((now + self.behavior.exit_delay, exit));
        }
        Ok(())
    }

    fn try_wait(&mut self) -> Result<Option<ExitInfo>> {
        if let Some(exit) = self.exited() {
            return Ok(Some(exit));
        }
        match self.exit_at {
            Some((at, exit)) if at <= Instant::now() => Ok(Some(self.finish(exit))),
            _ => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<ExitInfo> {
        if let Some(exit) = self.exited() {
            return Ok(exit);
        }
        match self.exit_at {
            Some((at, exit)) => {
                tokio::time::sleep_until(at).await;
                Ok(self.finish(exit))
            }
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// Cleanup work seen by [`FakeHardware`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareLog {
    /// Frames shown with every pixel off.
    pub led_clears: usize,
    pub display_clears: usize,
    pub gpio_releases: usize,
    /// `keep` argument of every `open_gpio` call.
    pub kept_pins: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct HardwareState {
    log: HardwareLog,
    fail_led: bool,
    fail_display: bool,
    fail_gpio: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeHardware {
    state: Arc<Mutex<HardwareState>>,
}

impl FakeHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_led(self) -> Self {
        lock(&self.state).fail_led = true;
        self
    }

    pub fn fail_display(self) -> Self {
        lock(&self.state).fail_display = true;
        self
    }

    pub fn fail_gpio(self) -> Self {
        lock(&self.state).fail_gpio = true;
        self
    }

    pub fn log(&self) -> HardwareLog {
        lock(&self.state).log.clone()
    }

    /// Number of cleanup passes that reached the display.
    pub fn cleanup_runs(&self) -> usize {
        self.log().display_clears
    }
}

#[async_trait]
impl Hardware for FakeHardware {
    async fn open_led_strip(&self) -> Result<Option<Box<dyn LedStrip>>, HardwareError> {
        if lock(&self.state).fail_led {
            return Err(HardwareError::Unavailable {
                resource: "led strip",
                reason: "injected failure".to_string(),
            });
        }
        Ok(Some(Box::new(FakeStrip {
            pixels: vec![Color::rgb(255, 255, 255); 8],
            state: Arc::clone(&self.state),
        })))
    }

    async fn open_display(&self) -> Result<Option<Box<dyn Display>>, HardwareError> {
        if lock(&self.state).fail_display {
            return Err(HardwareError::Unavailable {
                resource: "display",
                reason: "injected failure".to_string(),
            });
        }
        Ok(Some(Box::new(FakeDisplay {
            lit: true,
            state: Arc::clone(&self.state),
        })))
    }

    async fn open_gpio(&self, keep: &[u8]) -> Result<Option<Box<dyn Gpio>>, HardwareError> {
        let mut state = lock(&self.state);
        state.log.kept_pins.push(keep.to_vec());
        if state.fail_gpio {
            return Err(HardwareError::Release { pins: vec![17, 27] });
        }
        Ok(Some(Box::new(FakeReleaseGpio {
            state: Arc::clone(&self.state),
        })))
    }
}

struct FakeStrip {
    pixels: Vec<Color>,
    state: Arc<Mutex<HardwareState>>,
}

#[async_trait]
impl LedStrip for FakeStrip {
    fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Color) -> Result<(), HardwareError> {
        let count = self.pixels.len();
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(HardwareError::PixelOutOfRange { index, count })?;
        *pixel = color;
        Ok(())
    }

    async fn show(&mut self) -> Result<(), HardwareError> {
        if self.pixels.iter().all(|p| *p == Color::OFF) {
            lock(&self.state).log.led_clears += 1;
        }
        Ok(())
    }
}

struct FakeDisplay {
    lit: bool,
    state: Arc<Mutex<HardwareState>>,
}

#[async_trait]
impl Display for FakeDisplay {
    fn size(&self) -> (u32, u32) {
        (128, 64)
    }

    fn fill(&mut self, value: u8) {
        self.lit = value != 0;
    }

    fn write_image(&mut self, _image: &Bitmap) -> Result<(), HardwareError> {
        self.lit = true;
        Ok(())
    }

    async fn show(&mut self) -> Result<(), HardwareError> {
        if !self.lit {
            lock(&self.state).log.display_clears += 1;
        }
        Ok(())
    }
}

struct FakeReleaseGpio {
    state: Arc<Mutex<HardwareState>>,
}

#[async_trait]
impl Gpio for FakeReleaseGpio {
    async fn configure_input(&self, _pin: u8, _pull: Pull) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn read(&self, _pin: u8) -> Result<Level, HardwareError> {
        Ok(Level::High)
    }

    async fn release_all(&self) -> Result<Vec<u8>, HardwareError> {
        lock(&self.state).log.gpio_releases += 1;
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Button
// ---------------------------------------------------------------------------

/// A pulled-up button whose level follows a script: each `(offset, level)`
/// holds from `offset` after creation until the next entry. High (released)
/// before the first entry.
#[derive(Debug, Clone)]
pub struct ScriptedGpio {
    start: Instant,
    script: Vec<(Duration, Level)>,
    configured: Arc<Mutex<Vec<(u8, Pull)>>>,
}

impl ScriptedGpio {
    pub fn new(script: Vec<(Duration, Level)>) -> Self {
        Self {
            start: Instant::now(),
            script,
            configured: Arc::default(),
        }
    }

    /// Released, pressed from `at` for `held`, then released.
    pub fn press(at: Duration, held: Duration) -> Self {
        Self::new(vec![(at, Level::Low), (at + held, Level::High)])
    }

    pub fn configured(&self) -> Vec<(u8, Pull)> {
        lock(&self.configured).clone()
    }

    fn level_at(&self, elapsed: Duration) -> Level {
        self.script
            .iter()
            .take_while(|(offset, _)| *offset <= elapsed)
            .last()
            .map(|(_, level)| *level)
            .unwrap_or(Level::High)
    }
}

#[async_trait]
impl Gpio for ScriptedGpio {
    async fn configure_input(&self, pin: u8, pull: Pull) -> Result<(), HardwareError> {
        lock(&self.configured).push((pin, pull));
        Ok(())
    }

    async fn read(&self, _pin: u8) -> Result<Level, HardwareError> {
        Ok(self.level_at(self.start.elapsed()))
    }

    async fn release_all(&self) -> Result<Vec<u8>, HardwareError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
    }
    path
}

/// The standard catalog rooted at `dir`, with an empty file for every
/// experiment so launches pass the existence check.
pub fn fake_catalog(dir: &Path) -> Catalog {
    let catalog = Catalog::standard(dir);
    for entry in catalog.entries() {
        fs::write(&entry.program, "").expect("failed to create experiment file");
    }
    catalog
}
