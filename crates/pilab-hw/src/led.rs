//! Addressable LED strip.
//!
//! WS281x timing needs the PWM/DMA driver from the C `rpi_ws281x` library,
//! so the strip is driven through a helper program. [`HelperLedStrip`]
//! buffers pixel colours and, on `show()`, pipes the frame to the helper's
//! stdin: one line per pixel, six lowercase hex digits (`rrggbb`).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::HardwareError;

/// 24-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `rrggbb` in lowercase hex.
    pub fn to_hex(self) -> String {
        hex::encode([self.r, self.g, self.b])
    }
}

/// A strip of individually addressable pixels.
#[async_trait]
pub trait LedStrip: Send {
    fn pixel_count(&self) -> usize;

    /// Set one pixel in the pending frame. Takes effect on [`LedStrip::show`].
    fn set_pixel(&mut self, index: usize, color: Color) -> Result<(), HardwareError>;

    /// Latch the pending frame onto the strip.
    async fn show(&mut self) -> Result<(), HardwareError>;
}

/// Set every pixel to `color` and latch the frame.
pub async fn fill(strip: &mut dyn LedStrip, color: Color) -> Result<(), HardwareError> {
    for index in 0..strip.pixel_count() {
        strip.set_pixel(index, color)?;
    }
    strip.show().await
}

/// Default time allowed for the helper to accept a frame.
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(5);

/// [`LedStrip`] backed by an external helper command.
#[derive(Debug, Clone)]
pub struct HelperLedStrip {
    command: Vec<String>,
    pixels: Vec<Color>,
    timeout: Duration,
}

impl HelperLedStrip {
    /// `command` is the program followed by its arguments.
    pub fn new(command: Vec<String>, count: usize) -> Result<Self, HardwareError> {
        if command.is_empty() {
            return Err(HardwareError::Unavailable {
                resource: "led strip",
                reason: "no helper command configured".to_string(),
            });
        }
        Ok(Self {
            command,
            pixels: vec![Color::OFF; count],
            timeout: HELPER_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The pending frame in the helper's wire format.
    pub fn frame(&self) -> String {
        let mut out = String::with_capacity(self.pixels.len() * 7);
        for pixel in &self.pixels {
            out.push_str(&pixel.to_hex());
            out.push('\n');
        }
        out
    }

    async fn run_helper(&self) -> Result<(), HardwareError> {
        let program = &self.command[0];
        let mut child = Command::new(program)
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(HardwareError::io("led strip"))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A helper that ignores its input may close stdin early.
            if let Err(e) = stdin.write_all(self.frame().as_bytes()).await {
                debug!(error = %e, "LED helper closed stdin before reading the frame");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(HardwareError::io("led strip"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HardwareError::HelperFailed {
                program: program.clone(),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl LedStrip for HelperLedStrip {
    fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Color) -> Result<(), HardwareError> {
        let count = self.pixels.len();
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(HardwareError::PixelOutOfRange { index, count })?;
        *pixel = color;
        Ok(())
    }

    async fn show(&mut self) -> Result<(), HardwareError> {
        tokio::time::timeout(self.timeout, self.run_helper())
            .await
            .map_err(|_| HardwareError::HelperTimeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_hex_is_lowercase_rrggbb() {
        assert_eq!(Color::rgb(255, 0, 16).to_hex(), "ff0010");
        assert_eq!(Color::OFF.to_hex(), "000000");
    }

    #[test]
    fn empty_command_is_unavailable() {
        let err = HelperLedStrip::new(vec![], 10).unwrap_err();
        assert!(matches!(err, HardwareError::Unavailable { .. }));
    }

    #[test]
    fn set_pixel_out_of_range() {
        let mut strip = HelperLedStrip::new(vec!["true".into()], 3).unwrap();
        strip.set_pixel(2, Color::rgb(1, 2, 3)).unwrap();
        let err = strip.set_pixel(3, Color::OFF).unwrap_err();
        assert!(matches!(
            err,
            HardwareError::PixelOutOfRange { index: 3, count: 3 }
        ));
        assert_eq!(strip.frame(), "000000\n000000\n010203\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fill_pipes_frame_to_helper() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("frame.txt");
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > '{}'", out.display()),
        ];
        let mut strip = HelperLedStrip::new(command, 2).unwrap();
        fill(&mut strip, Color::rgb(0, 0x80, 0)).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "008000\n008000\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_helper_is_reported() {
        let mut strip = HelperLedStrip::new(vec!["false".into()], 1).unwrap();
        let err = strip.show().await.unwrap_err();
        assert!(matches!(err, HardwareError::HelperFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_helper_times_out() {
        let command = vec!["sleep".to_string(), "5".to_string()];
        let mut strip = HelperLedStrip::new(command, 1)
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let err = strip.show().await.unwrap_err();
        assert!(matches!(err, HardwareError::HelperTimeout(_)));
    }
}
