//! Supervisor behaviour against fake children and fake hardware.
//!
//! Every test runs on a paused tokio clock, so the 10 s / 5 s stop windows
//! and the 1 s switch delay elapse instantly and signal timestamps are
//! exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pilab_core::catalog::{Catalog, ExperimentId};
use pilab_core::cleanup::{CleanupOutcome, CleanupResource, StepStatus};
use pilab_core::console;
use pilab_core::control::{self, ExitReason, Request};
use pilab_core::process::{ExitInfo, StopSignal};
use pilab_core::supervisor::{ChildState, LaunchError, StopOutcome, Supervisor, SupervisorConfig};
use pilab_test_utils::{ChildBehavior, FakeHardware, FakeLauncher, RecordingConsole, fake_catalog};

use ExperimentId::{LedLottery as EX1, OledCalculator as EX2, ToffoliGate as EX3};

const BUTTON_PIN: u8 = 16;

// ===========================================================================
// Test harness
// ===========================================================================

struct Rig {
    dir: tempfile::TempDir,
    launcher: FakeLauncher,
    hardware: FakeHardware,
    console: Arc<RecordingConsole>,
    supervisor: Supervisor,
}

impl Rig {
    fn new() -> Self {
        Self::with_hardware(FakeHardware::new())
    }

    fn with_hardware(hardware: FakeHardware) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog = fake_catalog(dir.path());
        Self::build(dir, catalog, hardware)
    }

    fn build(dir: tempfile::TempDir, catalog: Catalog, hardware: FakeHardware) -> Self {
        let launcher = FakeLauncher::new();
        let console = RecordingConsole::new();
        let config = SupervisorConfig {
            reserved_pins: vec![BUTTON_PIN],
            ..SupervisorConfig::default()
        };
        let supervisor = Supervisor::new(
            Arc::new(catalog),
            Arc::new(launcher.clone()),
            Arc::new(hardware.clone()),
            console.clone(),
            config,
        );
        Self {
            dir,
            launcher,
            hardware,
            console,
            supervisor,
        }
    }
}

fn assert_near(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(5);
    assert!(
        actual >= expected && actual <= expected + slack,
        "expected ~{expected:?}, got {actual:?}"
    );
}

// ===========================================================================
// Transitions
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn console_scenario_cycle_then_quit() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();

    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    let catalog = Arc::new(rig.supervisor.catalog().clone());
    let reader = tokio::spawn(console::read_commands(
        BufReader::new(&b"v\nq\n"[..]),
        catalog,
        requests,
    ));

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown.clone()).await;
    reader.await.unwrap();

    assert_eq!(summary.reason, ExitReason::Quit);
    assert_eq!(rig.launcher.launches(), vec![EX1, EX2]);

    let first = rig.launcher.child(0);
    assert_eq!(first.count(StopSignal::Interrupt), 1);
    assert_eq!(first.count(StopSignal::Kill), 0);

    let second = rig.launcher.child(1);
    assert_eq!(second.sent(), vec![StopSignal::Interrupt]);
    assert!(matches!(summary.stop.outcome, StopOutcome::Exited { .. }));
    assert!(summary.stop.cleanup.is_some());
    assert_eq!(summary.release, StepStatus::Done);

    assert_eq!(rig.launcher.live_children(), 0);
    assert!(!rig.supervisor.has_child());
    assert_eq!(rig.supervisor.state(), ChildState::Idle);
    assert!(shutdown.is_cancelled());
    assert!(rig.console.contains("Goodbye!"));
}

#[tokio::test(start_paused = true)]
async fn cycle_wraps_around_catalog() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();
    for _ in 0..3 {
        let report = rig.supervisor.cycle().await;
        assert!(report.stopped.stopped_anything());
        assert!(report.started.is_ok());
    }
    assert_eq!(rig.launcher.launches(), vec![EX1, EX2, EX3, EX1]);
    assert_eq!(rig.supervisor.selected(), EX1);
}

#[tokio::test(start_paused = true)]
async fn cycle_waits_switch_delay_between_stop_and_start() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();
    let before = Instant::now();
    rig.supervisor.cycle().await;
    let second = rig.launcher.child(1);
    assert_near(second.launched_at - before, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn restart_relaunches_same_experiment() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX3).await.unwrap();
    let report = rig.supervisor.restart().await;
    assert_eq!(report.started, Ok(EX3));
    assert_eq!(rig.launcher.launches(), vec![EX3, EX3]);
}

#[tokio::test(start_paused = true)]
async fn select_running_experiment_is_noop() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX2).await.unwrap();
    assert!(rig.supervisor.select(EX2).await.is_none());
    assert_eq!(rig.launcher.launches(), vec![EX2]);
    assert!(rig.console.contains("already running"));

    let report = rig.supervisor.select(EX3).await.unwrap();
    assert_eq!(report.started, Ok(EX3));
    assert_eq!(rig.launcher.launches(), vec![EX2, EX3]);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_child_across_any_sequence() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();
    assert_eq!(
        rig.supervisor.start(EX2).await,
        Err(LaunchError::AlreadyRunning(EX1))
    );
    rig.supervisor.cycle().await;
    rig.supervisor.restart().await;
    rig.supervisor.select(EX1).await;
    rig.supervisor.stop().await;
    rig.supervisor.start(EX3).await.unwrap();
    rig.supervisor.cycle().await;

    assert_eq!(rig.launcher.overlapping_launches(), 0);
    assert_eq!(rig.launcher.live_children(), 1);
    assert_eq!(rig.launcher.launches(), vec![EX1, EX2, EX2, EX1, EX3, EX1]);
}

// ===========================================================================
// Stop protocol
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let mut rig = Rig::new();

    let report = rig.supervisor.stop().await;
    assert_eq!(report.outcome, StopOutcome::NotRunning);
    assert!(report.cleanup.is_none());
    assert_eq!(rig.supervisor.selected(), EX1);

    rig.supervisor.start(EX2).await.unwrap();
    let first = rig.supervisor.stop().await;
    let second = rig.supervisor.stop().await;
    assert!(first.stopped_anything());
    assert_eq!(second.outcome, StopOutcome::NotRunning);
    assert_eq!(rig.supervisor.selected(), EX2);
    assert_eq!(rig.hardware.cleanup_runs(), 1);
}

#[tokio::test(start_paused = true)]
async fn escalation_order_and_timing() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(EX1, ChildBehavior::stubborn());
    rig.supervisor.start(EX1).await.unwrap();

    let t0 = Instant::now();
    let report = rig.supervisor.stop().await;

    assert_eq!(
        report.signals_sent,
        vec![StopSignal::Interrupt, StopSignal::Terminate, StopSignal::Kill]
    );
    assert_eq!(report.outcome, StopOutcome::Killed(ExitInfo::signaled(9)));

    let child = rig.launcher.child(0);
    let offsets: Vec<Duration> = child.signals.iter().map(|s| s.at - t0).collect();
    assert_near(offsets[0], Duration::ZERO);
    assert_near(offsets[1], Duration::from_secs(10));
    assert_near(offsets[2], Duration::from_secs(15));

    assert_eq!(rig.supervisor.state(), ChildState::Idle);
    assert_eq!(rig.hardware.cleanup_runs(), 1);
}

#[tokio::test(start_paused = true)]
async fn graceful_exit_inside_window_sends_only_interrupt() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(
        EX1,
        ChildBehavior {
            exit_delay: Duration::from_secs(3),
            ..ChildBehavior::default()
        },
    );
    rig.supervisor.start(EX1).await.unwrap();

    let report = rig.supervisor.stop().await;
    assert_eq!(report.signals_sent, vec![StopSignal::Interrupt]);
    assert_eq!(
        report.outcome,
        StopOutcome::Exited {
            after: StopSignal::Interrupt,
            exit: ExitInfo::code(0),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn terminate_stops_child_that_ignores_interrupt() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(
        EX1,
        ChildBehavior {
            exits_on: vec![StopSignal::Terminate, StopSignal::Kill],
            ..ChildBehavior::default()
        },
    );
    rig.supervisor.start(EX1).await.unwrap();

    let report = rig.supervisor.stop().await;
    assert_eq!(
        report.signals_sent,
        vec![StopSignal::Interrupt, StopSignal::Terminate]
    );
    assert!(matches!(
        report.outcome,
        StopOutcome::Exited {
            after: StopSignal::Terminate,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn unkillable_child_is_reported_and_released() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(EX1, ChildBehavior::unkillable());
    rig.supervisor.start(EX1).await.unwrap();

    let report = rig.supervisor.stop().await;
    assert!(matches!(report.outcome, StopOutcome::KillFailed { .. }));
    assert!(!rig.supervisor.has_child());
    assert_eq!(rig.supervisor.state(), ChildState::Idle);
    assert_eq!(rig.hardware.cleanup_runs(), 1);

    // The supervisor carries on.
    rig.supervisor.start(EX2).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cleanup_runs_once_when_signalling_fails() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(
        EX1,
        ChildBehavior {
            fail_signals: true,
            ..ChildBehavior::default()
        },
    );
    rig.supervisor.start(EX1).await.unwrap();

    let report = rig.supervisor.stop().await;
    assert!(report.signals_sent.is_empty());
    assert_eq!(report.signal_errors.len(), 3);
    assert!(matches!(report.outcome, StopOutcome::KillFailed { .. }));
    assert!(report.cleanup.is_some());

    let log = rig.hardware.log();
    assert_eq!(log.led_clears, 1);
    assert_eq!(log.display_clears, 1);
    assert_eq!(log.gpio_releases, 1);
}

#[tokio::test(start_paused = true)]
async fn crashed_child_is_still_cleaned_up_on_stop() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(
        EX1,
        ChildBehavior {
            crash_with: Some(1),
            ..ChildBehavior::default()
        },
    );
    rig.supervisor.start(EX1).await.unwrap();

    let status = rig.supervisor.status();
    assert_eq!(status.state, ChildState::Exited);
    assert_eq!(status.pid, None);
    assert_eq!(status.last_exit, Some(ExitInfo::code(1)));

    let report = rig.supervisor.stop().await;
    assert_eq!(report.outcome, StopOutcome::AlreadyExited(ExitInfo::code(1)));
    assert!(report.signals_sent.is_empty());
    assert_eq!(rig.hardware.cleanup_runs(), 1);
    assert_eq!(rig.launcher.launches(), vec![EX1]);
}

#[tokio::test(start_paused = true)]
async fn cleanup_failure_degrades_without_blocking_stop() {
    let mut rig = Rig::with_hardware(FakeHardware::new().fail_display());
    rig.supervisor.start(EX1).await.unwrap();

    let report = rig.supervisor.stop().await;
    let cleanup = report.cleanup.unwrap();
    assert_eq!(cleanup.outcome(), CleanupOutcome::Degraded);
    assert!(matches!(
        cleanup.status_of(CleanupResource::Display),
        Some(StepStatus::Failed(_))
    ));
    assert_eq!(rig.hardware.log().led_clears, 1);
    assert_eq!(rig.hardware.log().gpio_releases, 1);
    assert_eq!(rig.supervisor.state(), ChildState::Idle);
    assert!(rig.console.contains("Emergency cleanup incomplete"));
}

#[tokio::test(start_paused = true)]
async fn cleanup_keeps_button_pin_until_final_release() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();
    rig.supervisor.stop().await;
    assert_eq!(rig.supervisor.release_pins().await, StepStatus::Done);
    assert_eq!(
        rig.hardware.log().kept_pins,
        vec![vec![BUTTON_PIN], Vec::new()]
    );
}

#[tokio::test(start_paused = true)]
async fn output_is_relayed_with_prefix() {
    let mut rig = Rig::new();
    rig.launcher.set_behavior(
        EX3,
        ChildBehavior {
            output: vec!["gate ready".to_string(), "AND = 1".to_string()],
            ..ChildBehavior::default()
        },
    );
    rig.supervisor.start(EX3).await.unwrap();
    rig.supervisor.stop().await;
    assert!(rig.console.contains("[EXP3] gate ready"));
    assert!(rig.console.contains("[EXP3] AND = 1"));
}

// ===========================================================================
// Launch failures
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn launch_failures_leave_supervisor_idle() {
    let mut rig = Rig::new();

    std::fs::remove_file(rig.dir.path().join("ex2.py")).unwrap();
    assert!(matches!(
        rig.supervisor.start(EX2).await,
        Err(LaunchError::MissingExecutable { id: EX2, .. })
    ));
    assert_eq!(rig.supervisor.state(), ChildState::Idle);

    rig.launcher.fail_launch(EX3);
    let err = rig.supervisor.start(EX3).await.unwrap_err();
    assert!(matches!(err, LaunchError::Spawn { id: EX3, ref message } if message.contains("permission denied")));
    assert_eq!(rig.supervisor.state(), ChildState::Idle);
    assert!(!rig.supervisor.has_child());
    assert_eq!(rig.supervisor.selected(), EX1);

    rig.supervisor.start(EX1).await.unwrap();
    assert_eq!(rig.supervisor.state(), ChildState::Running);
}

#[tokio::test(start_paused = true)]
async fn unknown_experiment_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let standard = fake_catalog(dir.path());
    let catalog = Catalog::new(vec![
        standard.get(EX1).unwrap().clone(),
        standard.get(EX3).unwrap().clone(),
    ])
    .unwrap();
    let mut rig = Rig::build(dir, catalog, FakeHardware::new());

    assert_eq!(
        rig.supervisor.start(EX2).await,
        Err(LaunchError::UnknownExperiment(EX2))
    );
    rig.supervisor.start(EX1).await.unwrap();
    rig.supervisor.cycle().await;
    assert_eq!(rig.launcher.launches(), vec![EX1, EX3]);
}

#[tokio::test(start_paused = true)]
async fn failed_cycle_moves_selection_and_reports_error() {
    let mut rig = Rig::new();
    rig.launcher.fail_launch(EX2);
    rig.supervisor.start(EX1).await.unwrap();

    let report = rig.supervisor.cycle().await;
    assert!(report.stopped.stopped_anything());
    assert!(matches!(report.started, Err(LaunchError::Spawn { id: EX2, .. })));
    assert!(!rig.supervisor.has_child());
    assert_eq!(rig.supervisor.selected(), EX2);

    // Next cycle continues from the failed selection.
    rig.supervisor.cycle().await;
    assert_eq!(rig.launcher.launches(), vec![EX1, EX3]);
}

// ===========================================================================
// Controller and latch
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn second_exit_is_ignored_and_late_requests_dropped() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();

    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());

    assert!(requests.exit(ExitReason::Signal).await);
    assert!(!requests.exit(ExitReason::LongPress).await);
    assert!(!requests.send(Request::Cycle).await);

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;
    assert_eq!(summary.reason, ExitReason::Signal);
    assert_eq!(rig.launcher.launches(), vec![EX1]);
    assert_eq!(rig.launcher.live_children(), 0);
}

#[tokio::test(start_paused = true)]
async fn signal_discards_transitions_queued_before_it() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();

    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    for _ in 0..3 {
        assert!(requests.send(Request::Cycle).await);
    }
    assert!(requests.send(Request::Restart).await);
    assert!(requests.exit(ExitReason::Signal).await);
    assert!(shutdown.is_cancelled());

    let started = Instant::now();
    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;

    assert_eq!(summary.reason, ExitReason::Signal);
    assert_eq!(rig.launcher.launches(), vec![EX1]);
    assert_eq!(rig.launcher.child(0).sent(), vec![StopSignal::Interrupt]);
    assert_eq!(rig.hardware.cleanup_runs(), 1);
    assert_eq!(rig.launcher.live_children(), 0);
    // No switch delays were taken.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn long_press_discards_queued_select() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();

    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    assert!(requests.send(Request::Select(EX3)).await);
    assert!(requests.send(Request::Status).await);
    assert!(requests.exit(ExitReason::LongPress).await);

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;
    assert_eq!(summary.reason, ExitReason::LongPress);
    assert_eq!(rig.launcher.launches(), vec![EX1]);
    assert!(!rig.console.contains("Status: running"));
}

#[tokio::test(start_paused = true)]
async fn quit_runs_commands_queued_before_it() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();

    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    assert!(requests.send(Request::Cycle).await);
    assert!(requests.exit(ExitReason::Quit).await);

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;
    assert_eq!(summary.reason, ExitReason::Quit);
    assert_eq!(rig.launcher.launches(), vec![EX1, EX2]);
    assert_eq!(rig.launcher.live_children(), 0);
}

#[tokio::test(start_paused = true)]
async fn exit_with_nothing_running_still_cleans_hardware() {
    let mut rig = Rig::new();
    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    requests.exit(ExitReason::Quit).await;

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;
    assert_eq!(summary.stop.outcome, StopOutcome::NotRunning);
    assert!(summary.stop.cleanup.is_none());
    assert_eq!(summary.cleanup.outcome(), CleanupOutcome::Clean);
    assert_eq!(rig.hardware.cleanup_runs(), 1);
    assert_eq!(summary.release, StepStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn exit_after_stop_does_not_clean_twice() {
    let mut rig = Rig::new();
    rig.supervisor.start(EX1).await.unwrap();
    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    requests.exit(ExitReason::EndOfInput).await;

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;
    assert_eq!(summary.stop.cleanup.as_ref(), Some(&summary.cleanup));
    assert_eq!(rig.hardware.cleanup_runs(), 1);
}

#[tokio::test(start_paused = true)]
async fn controller_reports_unknown_input_and_help() {
    let mut rig = Rig::new();
    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());

    requests.send(Request::Unknown("x".to_string())).await;
    requests.send(Request::Help).await;
    requests.exit(ExitReason::EndOfInput).await;

    let summary = control::run_controller(&mut rig.supervisor, rx, shutdown).await;
    assert_eq!(summary.reason, ExitReason::EndOfInput);
    assert_eq!(summary.stop.outcome, StopOutcome::NotRunning);
    assert!(rig.console.contains("Unknown command 'x'. Use 'h' for help."));
    assert!(rig.console.contains("Available experiments:"));
}
