//! Emergency hardware cleanup.
//!
//! Runs after every stop and once more at exit. A stopped experiment may
//! have left LEDs lit, the display showing stale output, or GPIO pins
//! exported, so each device is reopened directly and reset. Steps are
//! independent: a missing display does not keep the LEDs on.

use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;
use tracing::{info, warn};

use pilab_hw::led::{self, Color};
use pilab_hw::{Hardware, HardwareError};

/// A device touched by cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupResource {
    LedStrip,
    Display,
    Gpio,
}

impl fmt::Display for CleanupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CleanupResource::LedStrip => "led strip",
            CleanupResource::Display => "display",
            CleanupResource::Gpio => "gpio",
        };
        f.write_str(name)
    }
}

/// Result of resetting one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Done,
    /// The device is not configured on this board.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupStep {
    pub resource: CleanupResource,
    pub status: StepStatus,
}

/// Overall verdict of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupOutcome {
    /// Every configured device was reset.
    Clean,
    /// Some devices were reset, some failed.
    Degraded,
    /// Every configured device failed.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub steps: Vec<CleanupStep>,
}

impl CleanupReport {
    pub fn outcome(&self) -> CleanupOutcome {
        let attempted = self
            .steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
            .count();
        let failed = self.failures().count();
        if failed == 0 {
            CleanupOutcome::Clean
        } else if failed == attempted {
            CleanupOutcome::Failed
        } else {
            CleanupOutcome::Degraded
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn status_of(&self, resource: CleanupResource) -> Option<&StepStatus> {
        self.steps
            .iter()
            .find(|s| s.resource == resource)
            .map(|s| &s.status)
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|step| match &step.status {
                StepStatus::Done => format!("{} ok", step.resource),
                StepStatus::Skipped => format!("{} skipped", step.resource),
                StepStatus::Failed(e) => format!("{} FAILED ({e})", step.resource),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Turn every LED off, clear the display, then release GPIO pins other
/// than `keep_pins`. Never fails; problems are recorded in the report.
pub async fn emergency_cleanup(hardware: &dyn Hardware, keep_pins: &[u8]) -> CleanupReport {
    let steps = vec![
        run_step(CleanupResource::LedStrip, clear_led_strip(hardware)).await,
        run_step(CleanupResource::Display, clear_display(hardware)).await,
        run_step(CleanupResource::Gpio, release_gpio(hardware, keep_pins)).await,
    ];
    let report = CleanupReport { steps };

    match report.outcome() {
        CleanupOutcome::Clean => info!(%report, "hardware cleanup complete"),
        outcome => warn!(?outcome, %report, "hardware cleanup incomplete"),
    }
    report
}

/// Drive a step to completion, converting errors and panics into a status.
async fn run_step<F>(resource: CleanupResource, step: F) -> CleanupStep
where
    F: Future<Output = Result<bool, HardwareError>>,
{
    let status = match AssertUnwindSafe(step).catch_unwind().await {
        Ok(Ok(true)) => StepStatus::Done,
        Ok(Ok(false)) => StepStatus::Skipped,
        Ok(Err(e)) => {
            warn!(%resource, error = %e, "cleanup step failed");
            StepStatus::Failed(e.to_string())
        }
        Err(_) => {
            warn!(%resource, "cleanup step panicked");
            StepStatus::Failed("driver panicked".to_string())
        }
    };
    CleanupStep { resource, status }
}

async fn clear_led_strip(hardware: &dyn Hardware) -> Result<bool, HardwareError> {
    let Some(mut strip) = hardware.open_led_strip().await? else {
        return Ok(false);
    };
    led::fill(strip.as_mut(), Color::OFF).await?;
    Ok(true)
}

async fn clear_display(hardware: &dyn Hardware) -> Result<bool, HardwareError> {
    let Some(mut display) = hardware.open_display().await? else {
        return Ok(false);
    };
    display.fill(0);
    display.show().await?;
    Ok(true)
}

async fn release_gpio(hardware: &dyn Hardware, keep_pins: &[u8]) -> Result<bool, HardwareError> {
    let Some(gpio) = hardware.open_gpio(keep_pins).await? else {
        return Ok(false);
    };
    let released = gpio.release_all().await?;
    if !released.is_empty() {
        info!(pins = ?released, "released GPIO pins");
    }
    Ok(true)
}

/// Unexport every GPIO pin, including any the supervisor held. Run once
/// when the program exits.
pub async fn release_all_pins(hardware: &dyn Hardware) -> StepStatus {
    let step = run_step(CleanupResource::Gpio, release_gpio(hardware, &[])).await;
    step.status
}
