//! Digital I/O through the Linux sysfs GPIO interface.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::HardwareError;

/// Logic level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Internal bias resistor setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Up,
    Down,
    Off,
}

/// Minimal GPIO surface: configure an input, read it, release claims.
#[async_trait]
pub trait Gpio: Send + Sync {
    /// Claim `pin` as an input with the requested bias.
    async fn configure_input(&self, pin: u8, pull: Pull) -> Result<(), HardwareError>;

    /// Read the current level of a configured input.
    async fn read(&self, pin: u8) -> Result<Level, HardwareError>;

    /// Release every claimed pin this handle is allowed to release.
    ///
    /// Returns the pins that were released.
    async fn release_all(&self) -> Result<Vec<u8>, HardwareError>;
}

const EXPORT_SETTLE_ATTEMPTS: u32 = 10;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Labels of the SoC GPIO controller across Pi models.
const BCM_CHIP_LABELS: [&str; 3] = ["pinctrl-bcm2835", "pinctrl-bcm2711", "pinctrl-rp1"];

/// GPIO backend over `/sys/class/gpio`.
///
/// Pins are BCM numbers. Sysfs numbers them from the SoC chip's `base`,
/// which is 512 on current kernels, so the base is looked up when the
/// handle is opened.
///
/// `release_all` only touches the board's own pins (`managed`), minus
/// those in `keep`: a cleanup pass releases pins left behind by a dead
/// experiment, leaves the supervisor's button claimed and never touches
/// pins exported by other services.
///
/// Sysfs has no bias control; pull-ups must come from the device tree
/// (e.g. `gpio=16=ip,pu` in `config.txt`).
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    base: u16,
    managed: BTreeSet<u8>,
    keep: BTreeSet<u8>,
}

impl SysfsGpio {
    /// Open the sysfs tree at `root`, resolving the SoC chip's base.
    pub async fn open(
        root: impl Into<PathBuf>,
        managed: &[u8],
        keep: &[u8],
    ) -> Result<Self, HardwareError> {
        let root = root.into();
        let base = soc_chip_base(&root).await?;
        debug!(root = %root.display(), base, "opened sysfs gpio");
        Ok(Self {
            root,
            base,
            managed: managed.iter().copied().collect(),
            keep: keep.iter().copied().collect(),
        })
    }

    /// Sysfs number of BCM `pin`.
    pub fn sysfs_number(&self, pin: u8) -> u16 {
        self.base + u16::from(pin)
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{}", self.sysfs_number(pin)))
    }

    async fn write(&self, path: &Path, value: &str) -> Result<(), HardwareError> {
        tokio::fs::write(path, value)
            .await
            .map_err(HardwareError::io("gpio"))
    }
}

/// Base of the SoC GPIO chip: the `gpiochipN` whose label names a BCM or
/// RP1 controller, else the lowest base present, else 0.
async fn soc_chip_base(root: &Path) -> Result<u16, HardwareError> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(HardwareError::io("gpio"))?;
    let mut chips: Vec<(u16, String)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(HardwareError::io("gpio"))?
    {
        let name = entry.file_name();
        if !name.to_str().is_some_and(|n| n.starts_with("gpiochip")) {
            continue;
        }
        let dir = entry.path();
        let Ok(base) = tokio::fs::read_to_string(dir.join("base")).await else {
            continue;
        };
        let Ok(base) = base.trim().parse::<u16>() else {
            warn!(chip = %dir.display(), "unparseable gpiochip base");
            continue;
        };
        let label = tokio::fs::read_to_string(dir.join("label"))
            .await
            .unwrap_or_default();
        chips.push((base, label.trim().to_string()));
    }

    if let Some((base, label)) = chips
        .iter()
        .find(|(_, label)| BCM_CHIP_LABELS.contains(&label.as_str()))
    {
        debug!(base, %label, "found SoC gpio chip");
        return Ok(*base);
    }
    match chips.iter().map(|(base, _)| *base).min() {
        Some(base) => {
            warn!(base, "no BCM gpio chip label found; using lowest chip base");
            Ok(base)
        }
        None => Ok(0),
    }
}

#[async_trait]
impl Gpio for SysfsGpio {
    async fn configure_input(&self, pin: u8, pull: Pull) -> Result<(), HardwareError> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            self.write(&self.root.join("export"), &self.sysfs_number(pin).to_string())
                .await?;
            // udev adjusts permissions asynchronously after export.
            for _ in 0..EXPORT_SETTLE_ATTEMPTS {
                if dir.join("direction").exists() {
                    break;
                }
                tokio::time::sleep(EXPORT_SETTLE_DELAY).await;
            }
        }
        self.write(&dir.join("direction"), "in").await?;
        if pull != Pull::Off {
            debug!(pin, ?pull, "sysfs cannot set bias; relying on device tree");
        }
        Ok(())
    }

    async fn read(&self, pin: u8) -> Result<Level, HardwareError> {
        let raw = tokio::fs::read_to_string(self.pin_dir(pin).join("value"))
            .await
            .map_err(HardwareError::io("gpio"))?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(HardwareError::BadLevel {
                pin,
                value: other.to_string(),
            }),
        }
    }

    async fn release_all(&self) -> Result<Vec<u8>, HardwareError> {
        let unexport = self.root.join("unexport");
        let mut released = Vec::new();
        let mut failed = Vec::new();
        for &pin in self.managed.difference(&self.keep) {
            if !self.pin_dir(pin).exists() {
                continue;
            }
            match self
                .write(&unexport, &self.sysfs_number(pin).to_string())
                .await
            {
                Ok(()) => released.push(pin),
                Err(e) => {
                    warn!(pin, error = %e, "failed to unexport GPIO pin");
                    failed.push(pin);
                }
            }
        }
        if failed.is_empty() {
            Ok(released)
        } else {
            Err(HardwareError::Release { pins: failed })
        }
    }
}
