//! `pilab run` command: supervise experiments until quit, long press or a
//! signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pilab_core::button::{ButtonConfig, ButtonMonitor};
use pilab_core::catalog::{Catalog, ExperimentId};
use pilab_core::console::{self, Console, StdoutConsole};
use pilab_core::control::{self, ExitReason, ShutdownSignals};
use pilab_core::supervisor::{Supervisor, SupervisorConfig};
use pilab_hw::{Hardware, NoHardware, PiHardware};

use crate::config::PilabConfig;

/// Process exit code after a shutdown for `reason`.
pub fn exit_code(reason: ExitReason) -> i32 {
    match reason {
        ExitReason::Signal => 130,
        ExitReason::Quit | ExitReason::EndOfInput | ExitReason::LongPress => 0,
    }
}

/// Run the supervisor starting with experiment `experiment`.
pub async fn run(config: PilabConfig, experiment: u8) -> Result<ExitReason> {
    let catalog = Arc::new(Catalog::standard(&config.root));
    let initial = ExperimentId::from_number(experiment)
        .filter(|id| catalog.contains(*id))
        .with_context(|| format!("invalid experiment number: {experiment}"))?;

    let hardware: Arc<dyn Hardware> = match config.hardware {
        Some(ref hw) => Arc::new(PiHardware::new(hw.clone())),
        None => Arc::new(NoHardware),
    };
    let console: Arc<dyn Console> = Arc::new(StdoutConsole);

    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());

    // Signals first, so a Ctrl+C during startup still takes the stop path.
    let signals = ShutdownSignals::install().context("failed to install signal handlers")?;
    tokio::spawn(control::forward_signals(
        signals,
        requests.clone(),
        Arc::clone(&console),
    ));

    let mut reserved_pins = Vec::new();
    match open_button(&*hardware, config.button.clone()).await {
        Ok(Some(monitor)) => {
            reserved_pins.push(config.button.pin);
            tokio::spawn(monitor.run(requests.clone(), Arc::clone(&console)));
        }
        Ok(None) => debug!("no gpio; button disabled"),
        Err(e) => {
            let error = format!("{e:#}");
            warn!(pin = config.button.pin, %error, "button unavailable; console only");
        }
    }

    let mut supervisor = Supervisor::new(
        Arc::clone(&catalog),
        Arc::new(config.launcher()),
        hardware,
        Arc::clone(&console),
        SupervisorConfig {
            reserved_pins,
            ..SupervisorConfig::default()
        },
    );

    console.line("Experiment Controller with Graceful Shutdown");
    console.line(&"=".repeat(50));
    if let Err(e) = supervisor.start(initial).await {
        console.line(&format!("Failed to start initial experiment: {e}"));
    }
    console.line(&supervisor.status().to_string());
    console.line(&console::help_text(&catalog));

    info!(root = %config.root.display(), experiment = %initial, "supervisor ready");

    tokio::spawn(console::read_commands(
        BufReader::new(tokio::io::stdin()),
        catalog,
        requests,
    ));

    let summary = control::run_controller(&mut supervisor, rx, shutdown).await;
    info!(
        reason = %summary.reason,
        outcome = %summary.stop.outcome,
        "supervisor exited"
    );
    Ok(summary.reason)
}

async fn open_button(hardware: &dyn Hardware, config: ButtonConfig) -> Result<Option<ButtonMonitor>> {
    let Some(gpio) = hardware.open_gpio(&[]).await? else {
        return Ok(None);
    };
    let pin = config.pin;
    let monitor = ButtonMonitor::open(gpio, config)
        .await
        .with_context(|| format!("failed to configure button on GPIO {pin}"))?;
    Ok(Some(monitor))
}
