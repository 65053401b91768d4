//! GPIO lines shared with the capture microcontroller.
//!
//! Two signals matter: an output that holds the microcontroller in reset
//! while low, and an input it raises when new status data is waiting.

use std::path::Path;

use anyhow::Context;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

/// Line offsets on the GPIO chip.
#[derive(Debug, Clone, Copy)]
pub struct PinConfig {
    pub reset_line: u32,
    pub new_data_line: u32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            reset_line: 25,
            new_data_line: 11,
        }
    }
}

pub trait ControlPins: Send {
    /// Drive the reset line; `false` holds the microcontroller in reset.
    fn set_reset(&mut self, high: bool) -> anyhow::Result<()>;

    /// Sample the new-data line.
    fn new_data(&mut self) -> anyhow::Result<bool>;
}

/// Lines requested through the Linux GPIO character device.
pub struct CdevPins {
    reset: LineHandle,
    new_data: LineHandle,
}

impl CdevPins {
    pub fn open(chip_path: &Path, config: PinConfig) -> anyhow::Result<Self> {
        let mut chip = Chip::new(chip_path)
            .with_context(|| format!("opening GPIO chip {}", chip_path.display()))?;

        let reset = chip
            .get_line(config.reset_line)
            .context("getting reset line")?
            .request(LineRequestFlags::OUTPUT, 0, "brewpilot-reset")
            .context("requesting reset line")?;
        let new_data = chip
            .get_line(config.new_data_line)
            .context("getting new-data line")?
            .request(LineRequestFlags::INPUT, 0, "brewpilot-new-data")
            .context("requesting new-data line")?;

        Ok(Self { reset, new_data })
    }
}

impl ControlPins for CdevPins {
    fn set_reset(&mut self, high: bool) -> anyhow::Result<()> {
        self.reset
            .set_value(u8::from(high))
            .context("driving reset line")
    }

    fn new_data(&mut self) -> anyhow::Result<bool> {
        let value = self.new_data.get_value().context("reading new-data line")?;
        Ok(value != 0)
    }
}
