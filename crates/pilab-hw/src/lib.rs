//! Hardware boundary for the lab board: LED strip, OLED display and GPIO.
//!
//! The supervisor never drives hardware during normal operation (the
//! experiments do), but it must be able to reach every device directly to
//! put the board back into a safe state after an experiment is stopped.
//! This crate exposes the narrow traits that cleanup needs plus the
//! production backends behind them.
//!
//! ```text
//! Hardware (factory)
//!     |-- open_led_strip() --> Box<dyn LedStrip>   (HelperLedStrip)
//!     |-- open_display()   --> Box<dyn Display>    (Ssd1306 over I2C)
//!     `-- open_gpio(keep)  --> Box<dyn Gpio>       (SysfsGpio, board pins only)
//! ```

pub mod backend;
pub mod config;
pub mod display;
pub mod error;
pub mod gpio;
pub mod led;

pub use backend::{Hardware, NoHardware, PiHardware};
pub use config::{HardwareConfig, LedConfig, OledConfig, PinMap};
pub use display::{Bitmap, Display, Ssd1306};
pub use error::HardwareError;
pub use gpio::{Gpio, Level, Pull, SysfsGpio};
pub use led::{Color, HelperLedStrip, LedStrip};
