//! Pin assignments and device settings for the lab board.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// BCM pin numbers used on the lab board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub led_strip: u8,
    /// Left number button (calculator and gate experiments).
    pub button_left: u8,
    /// Right number button (calculator and gate experiments).
    pub button_right: u8,
    /// Calculate/action button shared by all experiments.
    pub button_calc: u8,
    /// Supervisor button: short press cycles, long press exits.
    pub button_toggle: u8,
    pub i2c_scl: u8,
    pub i2c_sda: u8,
}

impl PinMap {
    /// Named pins in display order.
    pub fn entries(&self) -> [(&'static str, u8); 7] {
        [
            ("led_strip", self.led_strip),
            ("button_left", self.button_left),
            ("button_right", self.button_right),
            ("button_calc", self.button_calc),
            ("button_toggle", self.button_toggle),
            ("i2c_scl", self.i2c_scl),
            ("i2c_sda", self.i2c_sda),
        ]
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            led_strip: 18,
            button_left: 17,
            button_right: 27,
            button_calc: 26,
            button_toggle: 16,
            i2c_scl: 3,
            i2c_sda: 2,
        }
    }
}

/// WS281x strip parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub count: usize,
    pub freq_hz: u32,
    pub dma: u8,
    pub brightness: u8,
    pub invert: bool,
    pub channel: u8,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count: 60,
            freq_hz: 800_000,
            dma: 10,
            brightness: 200,
            invert: false,
            channel: 0,
        }
    }
}

/// SSD1306 panel parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OledConfig {
    pub width: u32,
    pub height: u32,
    /// I2C character device, e.g. `/dev/i2c-1`.
    pub i2c_bus: PathBuf,
    pub address: u16,
}

impl Default for OledConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 64,
            i2c_bus: PathBuf::from("/dev/i2c-1"),
            address: 0x3C,
        }
    }
}

/// Everything needed to open the board's devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareConfig {
    pub pins: PinMap,
    pub led: LedConfig,
    pub oled: OledConfig,
    /// Command that receives LED frames on stdin. Empty means no strip.
    pub led_helper: Vec<String>,
    /// Root of the sysfs GPIO tree.
    pub gpio_root: PathBuf,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            pins: PinMap::default(),
            led: LedConfig::default(),
            oled: OledConfig::default(),
            led_helper: Vec::new(),
            gpio_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}
