//! Device factories.
//!
//! Every `open_*` call builds a fresh handle. Cleanup relies on this: the
//! process that owned the devices is gone, so nothing can be reused.
//! `Ok(None)` means the device is not configured on this board.

use async_trait::async_trait;

use crate::config::HardwareConfig;
use crate::display::{Display, Ssd1306};
use crate::error::HardwareError;
use crate::gpio::{Gpio, SysfsGpio};
use crate::led::{HelperLedStrip, LedStrip};

/// Opens the board's devices on demand.
#[async_trait]
pub trait Hardware: Send + Sync {
    async fn open_led_strip(&self) -> Result<Option<Box<dyn LedStrip>>, HardwareError>;

    async fn open_display(&self) -> Result<Option<Box<dyn Display>>, HardwareError>;

    /// Open GPIO. `keep` lists pins that `release_all` must not touch.
    async fn open_gpio(&self, keep: &[u8]) -> Result<Option<Box<dyn Gpio>>, HardwareError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Hardware) {}
};

/// The real board.
#[derive(Debug, Clone)]
pub struct PiHardware {
    config: HardwareConfig,
}

impl PiHardware {
    pub fn new(config: HardwareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }
}

#[async_trait]
impl Hardware for PiHardware {
    async fn open_led_strip(&self) -> Result<Option<Box<dyn LedStrip>>, HardwareError> {
        if self.config.led_helper.is_empty() {
            return Ok(None);
        }
        let strip = HelperLedStrip::new(self.config.led_helper.clone(), self.config.led.count)?;
        Ok(Some(Box::new(strip)))
    }

    async fn open_display(&self) -> Result<Option<Box<dyn Display>>, HardwareError> {
        let oled = self.config.oled.clone();
        let display = tokio::task::spawn_blocking(move || {
            Ssd1306::open(&oled.i2c_bus, oled.address, oled.width, oled.height)
        })
        .await
        .map_err(|e| HardwareError::Io {
            resource: "display",
            source: std::io::Error::other(e),
        })??;
        Ok(Some(Box::new(display)))
    }

    async fn open_gpio(&self, keep: &[u8]) -> Result<Option<Box<dyn Gpio>>, HardwareError> {
        if !self.config.gpio_root.is_dir() {
            return Err(HardwareError::Unavailable {
                resource: "gpio",
                reason: format!("{} not found", self.config.gpio_root.display()),
            });
        }
        let managed: Vec<u8> = self.config.pins.entries().iter().map(|(_, pin)| *pin).collect();
        let gpio = SysfsGpio::open(&self.config.gpio_root, &managed, keep).await?;
        Ok(Some(Box::new(gpio)))
    }
}

/// A machine with no lab hardware attached (development hosts, `--no-hardware`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardware;

#[async_trait]
impl Hardware for NoHardware {
    async fn open_led_strip(&self) -> Result<Option<Box<dyn LedStrip>>, HardwareError> {
        Ok(None)
    }

    async fn open_display(&self) -> Result<Option<Box<dyn Display>>, HardwareError> {
        Ok(None)
    }

    async fn open_gpio(&self, _keep: &[u8]) -> Result<Option<Box<dyn Gpio>>, HardwareError> {
        Ok(None)
    }
}
