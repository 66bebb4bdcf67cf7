//! Monochrome OLED panel (SSD1306 over I2C).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;

use crate::error::HardwareError;

/// A 1-bit image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<bool>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![false; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = on;
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.pixels[(y * self.width + x) as usize]
    }
}

/// A frame-buffered display.
#[async_trait]
pub trait Display: Send {
    /// Panel size in pixels as `(width, height)`.
    fn size(&self) -> (u32, u32);

    /// Set every pixel: `0` clears, anything else lights.
    fn fill(&mut self, value: u8);

    /// Copy a full-screen image into the frame buffer.
    fn write_image(&mut self, image: &Bitmap) -> Result<(), HardwareError>;

    /// Push the frame buffer to the panel.
    async fn show(&mut self) -> Result<(), HardwareError>;
}

/// Pack a bitmap into SSD1306 page layout: one byte per column per
/// 8-row page, least significant bit at the top.
pub fn pack_pages(image: &Bitmap) -> Vec<u8> {
    let pages = image.height.div_ceil(8);
    let mut buffer = vec![0u8; (image.width * pages) as usize];
    for y in 0..image.height {
        for x in 0..image.width {
            if image.get(x, y) {
                buffer[(x + (y / 8) * image.width) as usize] |= 1 << (y % 8);
            }
        }
    }
    buffer
}

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;
const DATA_CHUNK: usize = 16;
const MAX_WIDTH: u32 = 128;
const MAX_HEIGHT: u32 = 64;

/// SSD1306 driver on a Linux I2C character device.
#[derive(Debug)]
pub struct Ssd1306 {
    device: File,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl Ssd1306 {
    /// Open the bus, select the panel's address and run the init sequence.
    /// Blocking; call from `spawn_blocking` on a runtime.
    pub fn open(bus: &Path, address: u16, width: u32, height: u32) -> Result<Self, HardwareError> {
        check_panel_size(width, height)?;
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(bus)
            .map_err(HardwareError::io("display"))?;
        select_address(&device, address)?;

        let mut display = Self {
            device,
            width,
            height,
            buffer: vec![0; (width * height.div_ceil(8)) as usize],
        };
        display.init()?;
        Ok(display)
    }

    fn init(&mut self) -> Result<(), HardwareError> {
        let com_pins = if self.height == 64 { 0x12 } else { 0x02 };
        let multiplex = (self.height - 1) as u8;
        self.commands(&[
            0xAE, // display off
            0xD5, 0x80, // clock divide
            0xA8, multiplex,
            0xD3, 0x00, // display offset
            0x40, // start line 0
            0x8D, 0x14, // charge pump on
            0x20, 0x00, // horizontal addressing
            0xA1, // segment remap
            0xC8, // COM scan descending
            0xDA, com_pins,
            0x81, 0xCF, // contrast
            0xD9, 0xF1, // precharge
            0xDB, 0x40, // VCOM detect
            0xA4, // resume from RAM
            0xA6, // normal (not inverted)
            0xAF, // display on
        ])
    }

    fn commands(&mut self, bytes: &[u8]) -> Result<(), HardwareError> {
        write_commands(&mut self.device, bytes)
    }
}

/// The controller drives at most 128 columns and 64 rows, in 8-row pages.
fn check_panel_size(width: u32, height: u32) -> Result<(), HardwareError> {
    if (1..=MAX_WIDTH).contains(&width) && (8..=MAX_HEIGHT).contains(&height) && height % 8 == 0 {
        return Ok(());
    }
    Err(HardwareError::PanelSize { width, height })
}

fn write_commands(device: &mut File, bytes: &[u8]) -> Result<(), HardwareError> {
    for byte in bytes {
        device
            .write_all(&[CONTROL_COMMAND, *byte])
            .map_err(HardwareError::io("display"))?;
    }
    Ok(())
}

fn write_frame(device: &mut File, window: &[u8], buffer: &[u8]) -> Result<(), HardwareError> {
    write_commands(device, window)?;
    let mut packet = Vec::with_capacity(DATA_CHUNK + 1);
    for chunk in buffer.chunks(DATA_CHUNK) {
        packet.clear();
        packet.push(CONTROL_DATA);
        packet.extend_from_slice(chunk);
        device
            .write_all(&packet)
            .map_err(HardwareError::io("display"))?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn select_address(device: &File, address: u16) -> Result<(), HardwareError> {
    use std::os::fd::AsRawFd;

    const I2C_SLAVE: libc::c_ulong = 0x0703;

    // SAFETY: the fd is owned by `device` and stays open for the call;
    // I2C_SLAVE takes the address by value.
    let ret = unsafe {
        libc::ioctl(
            device.as_raw_fd(),
            I2C_SLAVE as _,
            libc::c_ulong::from(address),
        )
    };
    if ret < 0 {
        return Err(HardwareError::Io {
            resource: "display",
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn select_address(_device: &File, _address: u16) -> Result<(), HardwareError> {
    Err(HardwareError::Unavailable {
        resource: "display",
        reason: "I2C is only supported on Linux".to_string(),
    })
}

#[async_trait]
impl Display for Ssd1306 {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill(&mut self, value: u8) {
        let byte = if value == 0 { 0x00 } else { 0xFF };
        self.buffer.fill(byte);
    }

    fn write_image(&mut self, image: &Bitmap) -> Result<(), HardwareError> {
        if (image.width, image.height) != (self.width, self.height) {
            return Err(HardwareError::ImageSize {
                width: image.width,
                height: image.height,
                expected_width: self.width,
                expected_height: self.height,
            });
        }
        self.buffer = pack_pages(image);
        Ok(())
    }

    async fn show(&mut self) -> Result<(), HardwareError> {
        // Both fit in a byte: open() caps the panel at 128x64.
        let last_column = (self.width - 1) as u8;
        let last_page = (self.height / 8 - 1) as u8;
        let window = [0x21, 0, last_column, 0x22, 0, last_page];

        let mut device = self.device.try_clone().map_err(HardwareError::io("display"))?;
        let buffer = self.buffer.clone();
        tokio::task::spawn_blocking(move || write_frame(&mut device, &window, &buffer))
            .await
            .map_err(|e| HardwareError::Io {
                resource: "display",
                source: std::io::Error::other(e),
            })?
    }
}
