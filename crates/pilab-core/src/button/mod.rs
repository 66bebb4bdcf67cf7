//! Supervisor button: debounced short and long press detection.
//!
//! The button sits on a pulled-up input and reads low while pressed. A
//! level change only counts once it has been stable for the debounce
//! threshold. A press released before the hold threshold is a short press;
//! holding it for the threshold or longer is a long press, reported once,
//! with a countdown shown from `countdown_after` onwards.

mod monitor;

use std::time::Duration;

use tokio::time::Instant;

pub use monitor::ButtonMonitor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonConfig {
    /// BCM pin number.
    pub pin: u8,
    pub poll_interval: Duration,
    pub debounce: Duration,
    /// Hold time that turns a press into a long press.
    pub hold: Duration,
    pub countdown_after: Duration,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: 16,
            poll_interval: Duration::from_millis(50),
            debounce: Duration::from_millis(100),
            hold: Duration::from_secs(5),
            countdown_after: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Released before the hold threshold.
    ShortPress { held: Duration },
    /// Held for the hold threshold. Emitted once per press.
    LongPress,
    /// Still held; this many whole seconds remain until a long press.
    Countdown { remaining_secs: u64 },
}

/// Turns raw samples into [`ButtonEvent`]s.
#[derive(Debug, Clone)]
pub struct PressTracker {
    debounce: Duration,
    hold: Duration,
    countdown_after: Duration,
    /// Last raw sample and when it last changed.
    raw: bool,
    last_edge: Instant,
    /// Debounced state.
    pressed: bool,
    press_started_at: Option<Instant>,
    long_fired: bool,
    last_countdown: Option<u64>,
}

impl PressTracker {
    /// A tracker that starts out released.
    pub fn new(config: &ButtonConfig, now: Instant) -> Self {
        Self {
            debounce: config.debounce,
            hold: config.hold,
            countdown_after: config.countdown_after,
            raw: false,
            last_edge: now,
            pressed: false,
            press_started_at: None,
            long_fired: false,
            last_countdown: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Feed one sample taken at `now`.
    pub fn sample(&mut self, raw: bool, now: Instant) -> Option<ButtonEvent> {
        if raw != self.raw {
            self.raw = raw;
            self.last_edge = now;
        }

        if self.raw != self.pressed && now.duration_since(self.last_edge) >= self.debounce {
            self.pressed = self.raw;
            if self.pressed {
                self.press_started_at = Some(self.last_edge);
                self.long_fired = false;
                self.last_countdown = None;
            } else if let Some(event) = self.release() {
                return Some(event);
            }
        }

        if self.pressed && self.raw && !self.long_fired {
            return self.check_hold(now);
        }
        None
    }

    fn release(&mut self) -> Option<ButtonEvent> {
        let started = self.press_started_at.take()?;
        self.last_countdown = None;
        if std::mem::take(&mut self.long_fired) {
            return None;
        }
        // Measured to the release edge, not to when it was confirmed.
        let held = self.last_edge.duration_since(started);
        (held < self.hold).then_some(ButtonEvent::ShortPress { held })
    }

    fn check_hold(&mut self, now: Instant) -> Option<ButtonEvent> {
        let held = now.duration_since(self.press_started_at?);
        if held >= self.hold {
            self.long_fired = true;
            return Some(ButtonEvent::LongPress);
        }
        if held < self.countdown_after {
            return None;
        }
        let remaining_secs = (self.hold - held).as_secs_f64().ceil() as u64;
        if self.last_countdown == Some(remaining_secs) {
            return None;
        }
        self.last_countdown = Some(remaining_secs);
        Some(ButtonEvent::Countdown { remaining_secs })
    }
}
