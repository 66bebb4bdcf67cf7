use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pilab_hw::{Gpio, HardwareError, Level, Pull};

use super::{ButtonConfig, ButtonEvent, PressTracker};
use crate::console::Console;
use crate::control::{ExitReason, Request, Requests};

/// Polls the supervisor button and turns presses into requests.
pub struct ButtonMonitor {
    gpio: Box<dyn Gpio>,
    config: ButtonConfig,
}

impl ButtonMonitor {
    /// Claim the button pin as a pulled-up input.
    pub async fn open(gpio: Box<dyn Gpio>, config: ButtonConfig) -> Result<Self, HardwareError> {
        gpio.configure_input(config.pin, Pull::Up).await?;
        info!(pin = config.pin, "button monitor ready");
        Ok(Self { gpio, config })
    }

    /// Poll until a long press or the shutdown latch. Short presses cycle
    /// experiments; a long press requests exit.
    pub async fn run(self, requests: Requests, console: Arc<dyn Console>) {
        let pin = self.config.pin;
        let mut ticks = tokio::time::interval(self.config.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = PressTracker::new(&self.config, Instant::now());
        let mut read_failing = false;

        loop {
            tokio::select! {
                _ = requests.shutdown().cancelled() => {
                    debug!("button monitor stopping");
                    return;
                }
                _ = ticks.tick() => {}
            }

            let level = match self.gpio.read(pin).await {
                Ok(level) => {
                    if std::mem::take(&mut read_failing) {
                        info!(pin, "button readable again");
                    }
                    level
                }
                Err(e) => {
                    if !read_failing {
                        warn!(pin, error = %e, "failed to read button");
                        read_failing = true;
                    }
                    continue;
                }
            };

            match tracker.sample(level == Level::Low, Instant::now()) {
                Some(ButtonEvent::ShortPress { held }) => {
                    info!(pin, held_ms = held.as_millis() as u64, "short press");
                    console.line("Button pressed: switching experiment");
                    if !requests.send(Request::Cycle).await {
                        debug!("cycle request dropped");
                    }
                }
                Some(ButtonEvent::Countdown { remaining_secs }) => {
                    console.line(&format!("Hold {remaining_secs}s more to shut down"));
                }
                Some(ButtonEvent::LongPress) => {
                    info!(pin, "long press");
                    console.line("Long press detected: shutting down");
                    requests.exit(ExitReason::LongPress).await;
                    return;
                }
                None => {}
            }
        }
    }
}
