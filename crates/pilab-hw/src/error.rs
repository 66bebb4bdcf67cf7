use std::time::Duration;

use thiserror::Error;

/// Errors raised by hardware backends.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The device is not present or not configured on this machine.
    #[error("{resource} unavailable: {reason}")]
    Unavailable {
        resource: &'static str,
        reason: String,
    },

    /// An I/O operation on the device failed.
    #[error("{resource} I/O error: {source}")]
    Io {
        resource: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A pixel index beyond the end of the strip.
    #[error("pixel index {index} out of range (strip has {count} pixels)")]
    PixelOutOfRange { index: usize, count: usize },

    /// An image whose dimensions do not match the panel.
    #[error("image is {width}x{height}, display is {expected_width}x{expected_height}")]
    ImageSize {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// A panel size the SSD1306 cannot drive.
    #[error("unsupported display size {width}x{height} (max 128x64, height a multiple of 8)")]
    PanelSize { width: u32, height: u32 },

    /// The LED helper program exited unsuccessfully.
    #[error("LED helper {program:?} failed: {detail}")]
    HelperFailed { program: String, detail: String },

    /// The LED helper program did not finish in time.
    #[error("LED helper timed out after {0:?}")]
    HelperTimeout(Duration),

    /// A GPIO value file contained something other than `0` or `1`.
    #[error("unexpected value {value:?} on GPIO {pin}")]
    BadLevel { pin: u8, value: String },

    /// One or more pins could not be released.
    #[error("failed to release GPIO pins {pins:?}")]
    Release { pins: Vec<u8> },
}

impl HardwareError {
    /// Adapter for `map_err` on I/O results.
    pub fn io(resource: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { resource, source }
    }
}
