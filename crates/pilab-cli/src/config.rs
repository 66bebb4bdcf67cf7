//! Configuration file management for pilab.
//!
//! Provides a TOML-based config file at `~/.config/pilab/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use pilab_core::button::ButtonConfig;
use pilab_core::process::SubprocessLauncher;
use pilab_hw::{HardwareConfig, LedConfig, OledConfig, PinMap};

/// Environment override for the project root.
pub const ROOT_ENV: &str = "PILAB_ROOT";
/// Set to `1` or `true` to launch experiments without elevation.
pub const NO_SUDO_ENV: &str = "PILAB_NO_SUDO";

const FALLBACK_INTERPRETER: &str = "python3";

/// LED cleanup helper looked up under the project root.
const DEFAULT_LED_HELPER: &str = "scripts/cleanup_leds.py";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub launch: LaunchSection,
    pub button: ButtonSection,
    pub hardware: HardwareSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSection {
    /// Directory holding `ex1.py` .. `ex3.py`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Interpreter for the experiment scripts; relative paths are under
    /// the root. Defaults to `venv/bin/python`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,
    /// Run experiments through `elevate_command` (needed for GPIO/DMA).
    pub elevate: bool,
    pub elevate_command: String,
}

impl Default for LaunchSection {
    fn default() -> Self {
        Self {
            root: None,
            interpreter: None,
            elevate: true,
            elevate_command: "sudo".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonSection {
    pub pin: u8,
    pub debounce_ms: u64,
    pub poll_ms: u64,
    pub hold_secs: u64,
    pub countdown_after_secs: u64,
}

impl Default for ButtonSection {
    fn default() -> Self {
        let defaults = ButtonConfig::default();
        Self {
            pin: defaults.pin,
            debounce_ms: defaults.debounce.as_millis() as u64,
            poll_ms: defaults.poll_interval.as_millis() as u64,
            hold_secs: defaults.hold.as_secs(),
            countdown_after_secs: defaults.countdown_after.as_secs(),
        }
    }
}

impl ButtonSection {
    pub fn to_button_config(&self) -> ButtonConfig {
        ButtonConfig {
            pin: self.pin,
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
            debounce: Duration::from_millis(self.debounce_ms),
            hold: Duration::from_secs(self.hold_secs),
            countdown_after: Duration::from_secs(self.countdown_after_secs),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSection {
    pub enabled: bool,
    pub led_count: usize,
    /// Command that receives LED frames on stdin. Defaults to the root's
    /// `scripts/cleanup_leds.py` when that exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_helper: Option<Vec<String>>,
    pub i2c_bus: PathBuf,
    pub display_address: u16,
    pub gpio_root: PathBuf,
    pub pins: PinMap,
}

impl Default for HardwareSection {
    fn default() -> Self {
        let defaults = HardwareConfig::default();
        Self {
            enabled: true,
            led_count: defaults.led.count,
            led_helper: None,
            i2c_bus: defaults.oled.i2c_bus,
            display_address: defaults.oled.address,
            gpio_root: defaults.gpio_root,
            pins: defaults.pins,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the pilab config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/pilab` or `~/.config/pilab`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("pilab");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("pilab")
}

/// Return the path to the pilab config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Load the config file if there is one. A file that exists but does not
/// parse is an error.
pub fn load_config_if_present() -> Result<Option<ConfigFile>> {
    if !config_path().exists() {
        return Ok(None);
    }
    load_config().map(Some)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Command-line flags that take part in resolution.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub no_sudo: bool,
    pub no_hardware: bool,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct PilabConfig {
    pub root: PathBuf,
    pub interpreter: PathBuf,
    /// Elevation program, `None` to run experiments directly.
    pub elevate: Option<String>,
    /// `None` when hardware access is disabled.
    pub hardware: Option<HardwareConfig>,
    pub button: ButtonConfig,
}

impl PilabConfig {
    /// Resolve configuration from the config file (if any), environment and
    /// flags.
    pub fn resolve(flags: &Overrides) -> Result<Self> {
        let file = load_config_if_present()?;
        Self::resolve_with(file.unwrap_or_default(), flags)
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - root: `--root` > `PILAB_ROOT` > `launch.root` > current directory
    /// - elevation: `--no-sudo` > `PILAB_NO_SUDO` > `launch.elevate`
    /// - hardware: `--no-hardware` > `hardware.enabled`
    pub fn resolve_with(file: ConfigFile, flags: &Overrides) -> Result<Self> {
        let root = if let Some(ref root) = flags.root {
            root.clone()
        } else if let Ok(root) = std::env::var(ROOT_ENV) {
            PathBuf::from(root)
        } else if let Some(ref root) = file.launch.root {
            root.clone()
        } else {
            std::env::current_dir().context("failed to determine current directory")?
        };

        let interpreter = match file.launch.interpreter {
            Some(ref path) => root.join(path),
            None => root.join("venv").join("bin").join("python"),
        };

        let elevate = if flags.no_sudo || env_flag(NO_SUDO_ENV) || !file.launch.elevate {
            None
        } else {
            Some(file.launch.elevate_command.clone())
        };

        let hardware = if flags.no_hardware || !file.hardware.enabled {
            None
        } else {
            Some(hardware_config(&file.hardware, &root, &interpreter, elevate.as_deref()))
        };

        Ok(Self {
            root,
            interpreter,
            elevate,
            hardware,
            button: file.button.to_button_config(),
        })
    }

    /// Launcher for the catalog's scripts. A missing interpreter falls back
    /// to `python3` on the PATH.
    pub fn launcher(&self) -> SubprocessLauncher {
        let interpreter = if self.interpreter.exists() {
            self.interpreter.clone()
        } else {
            warn!(
                interpreter = %self.interpreter.display(),
                "interpreter not found; using {FALLBACK_INTERPRETER}"
            );
            PathBuf::from(FALLBACK_INTERPRETER)
        };
        let launcher = SubprocessLauncher::new(&self.root).with_interpreter(interpreter);
        match self.elevate {
            Some(ref program) => launcher.with_elevation(program),
            None => launcher,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn hardware_config(
    section: &HardwareSection,
    root: &Path,
    interpreter: &Path,
    elevate: Option<&str>,
) -> HardwareConfig {
    let led_helper = match section.led_helper {
        Some(ref command) => command.clone(),
        None => default_led_helper(root, interpreter, elevate),
    };
    HardwareConfig {
        pins: section.pins,
        led: LedConfig {
            count: section.led_count,
            ..LedConfig::default()
        },
        oled: OledConfig {
            i2c_bus: section.i2c_bus.clone(),
            address: section.display_address,
            ..OledConfig::default()
        },
        led_helper,
        gpio_root: section.gpio_root.clone(),
    }
}

/// `[sudo] <interpreter> <root>/scripts/cleanup_leds.py`, or nothing when
/// the script is absent.
fn default_led_helper(root: &Path, interpreter: &Path, elevate: Option<&str>) -> Vec<String> {
    let script = root.join(DEFAULT_LED_HELPER);
    if !script.is_file() {
        return Vec::new();
    }
    let mut command = Vec::with_capacity(3);
    if let Some(program) = elevate {
        command.push(program.to_string());
    }
    command.push(interpreter.display().to_string());
    command.push(script.display().to_string());
    command
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
