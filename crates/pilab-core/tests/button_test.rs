//! Button monitor driven by a scripted GPIO on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pilab_core::button::{ButtonConfig, ButtonMonitor};
use pilab_core::control::{self, ExitReason, Request, RequestQueue};
use pilab_hw::Pull;
use pilab_test_utils::{RecordingConsole, ScriptedGpio};

struct Running {
    shutdown: CancellationToken,
    rx: RequestQueue,
    console: Arc<RecordingConsole>,
    task: JoinHandle<()>,
}

async fn spawn_monitor(gpio: ScriptedGpio) -> Running {
    let shutdown = CancellationToken::new();
    let (requests, rx) = control::channel(shutdown.clone());
    let console = RecordingConsole::new();
    let monitor = ButtonMonitor::open(Box::new(gpio), ButtonConfig::default())
        .await
        .unwrap();
    let task = tokio::spawn(monitor.run(requests, console.clone()));
    Running {
        shutdown,
        rx,
        console,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn open_claims_pin_with_pull_up() {
    let gpio = ScriptedGpio::new(Vec::new());
    let handle = gpio.clone();
    let running = spawn_monitor(gpio).await;
    assert_eq!(handle.configured(), vec![(16, Pull::Up)]);

    running.shutdown.cancel();
    running.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn short_press_requests_one_cycle() {
    let gpio = ScriptedGpio::press(Duration::from_millis(200), Duration::from_millis(800));
    let mut running = spawn_monitor(gpio).await;

    assert_eq!(running.rx.recv().await, Some(Request::Cycle));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(running.rx.try_recv().is_err());

    running.shutdown.cancel();
    running.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn release_at_4_9s_cycles_without_shutdown() {
    let gpio = ScriptedGpio::press(Duration::from_millis(200), Duration::from_millis(4900));
    let mut running = spawn_monitor(gpio).await;

    assert_eq!(running.rx.recv().await, Some(Request::Cycle));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(running.rx.try_recv().is_err());
    assert!(!running.shutdown.is_cancelled());
    assert!(running.console.contains("Hold 1s more to shut down"));

    running.shutdown.cancel();
    running.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn long_press_requests_exit_and_stops_monitor() {
    let gpio = ScriptedGpio::press(Duration::from_millis(200), Duration::from_secs(8));
    let mut running = spawn_monitor(gpio).await;

    assert_eq!(
        running.rx.recv().await,
        Some(Request::Exit(ExitReason::LongPress))
    );
    running.task.await.unwrap();
    assert!(running.shutdown.is_cancelled());
    assert!(running.console.contains("Hold 3s more to shut down"));
    assert!(running.console.contains("Long press detected"));
    assert!(running.rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn chatter_shorter_than_debounce_is_ignored() {
    let script = (0..20u64)
        .map(|i| {
            let level = if i % 2 == 0 {
                pilab_hw::Level::Low
            } else {
                pilab_hw::Level::High
            };
            (Duration::from_millis(100 + i * 50), level)
        })
        .collect();
    let mut running = spawn_monitor(ScriptedGpio::new(script)).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(running.rx.try_recv().is_err());

    running.shutdown.cancel();
    running.task.await.unwrap();
}
