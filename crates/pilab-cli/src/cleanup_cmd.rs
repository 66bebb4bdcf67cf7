//! `pilab cleanup` command: reset LEDs, display and GPIO once.
//!
//! Useful after an experiment was run by hand and left the board lit.

use anyhow::{Context, Result};

use pilab_core::cleanup::{self, CleanupOutcome, CleanupReport, StepStatus};
use pilab_hw::{Hardware, NoHardware, PiHardware};

use crate::config::PilabConfig;

/// Run the cleanup command.
pub async fn run_cleanup(config: &PilabConfig, json: bool) -> Result<()> {
    let report = match config.hardware {
        Some(ref hw) => cleanup_with(&PiHardware::new(hw.clone())).await,
        None => cleanup_with(&NoHardware).await,
    };

    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{out}");
    } else {
        print!("{}", format_report(&report));
    }

    if report.outcome() == CleanupOutcome::Failed {
        anyhow::bail!("emergency cleanup failed for every device");
    }
    Ok(())
}

async fn cleanup_with(hardware: &dyn Hardware) -> CleanupReport {
    cleanup::emergency_cleanup(hardware, &[]).await
}

/// Human-readable report, one device per line.
pub fn format_report(report: &CleanupReport) -> String {
    let mut out = String::new();
    for step in &report.steps {
        let status = match step.status {
            StepStatus::Done => "ok".to_string(),
            StepStatus::Skipped => "skipped (not configured)".to_string(),
            StepStatus::Failed(ref e) => format!("FAILED: {e}"),
        };
        out.push_str(&format!("  {:<10} {status}\n", step.resource.to_string()));
    }
    let verdict = match report.outcome() {
        CleanupOutcome::Clean => "Emergency cleanup completed",
        CleanupOutcome::Degraded => "Emergency cleanup incomplete",
        CleanupOutcome::Failed => "Emergency cleanup failed",
    };
    out.push_str(verdict);
    out.push('\n');
    out
}
