//! Captured framebuffer of the appliance display.
//!
//! The display is a 128x64 monochrome panel in paged layout: eight planes,
//! each plane one byte per column, each byte eight vertically stacked pixels
//! with the least significant bit on top.

use std::fmt;

use thiserror::Error;

/// Pixel columns per plane.
pub const PLANE_WIDTH: usize = 128;

/// Number of planes (pages) in one frame.
pub const PLANE_COUNT: usize = 8;

/// Pixel rows encoded by one plane byte.
pub const PIXELS_PER_BYTE: usize = 8;

/// Total framebuffer size in bytes.
pub const SCREEN_LEN: usize = PLANE_WIDTH * PLANE_COUNT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("framebuffer must be {SCREEN_LEN} bytes, got {0}")]
pub struct ScreenError(pub usize);

/// One complete framebuffer.
///
/// Always exactly [`SCREEN_LEN`] bytes. A new poll replaces the whole value.
#[derive(Clone, PartialEq, Eq)]
pub struct Screen {
    bytes: Box<[u8; SCREEN_LEN]>,
}

impl Screen {
    /// A dark screen.
    pub fn blank() -> Self {
        Self::from_array([0; SCREEN_LEN])
    }

    pub fn from_array(bytes: [u8; SCREEN_LEN]) -> Self {
        Self {
            bytes: Box::new(bytes),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScreenError> {
        let array: [u8; SCREEN_LEN] = bytes.try_into().map_err(|_| ScreenError(bytes.len()))?;
        Ok(Self::from_array(array))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Whether every lit pixel of `mask` is also lit here.
    ///
    /// Dark mask pixels are wildcards, so an all-dark mask is covered by
    /// every screen.
    pub fn covers(&self, mask: &Screen) -> bool {
        self.bytes
            .iter()
            .zip(mask.bytes.iter())
            .all(|(&own, &m)| own & m == m)
    }

    /// Whether the pixel at (`x`, `y`) is lit. Out-of-range reads are dark.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        if x >= PLANE_WIDTH || y >= PLANE_COUNT * PIXELS_PER_BYTE {
            return false;
        }
        let byte = self.bytes[(y / PIXELS_PER_BYTE) * PLANE_WIDTH + x];
        byte & (1 << (y % PIXELS_PER_BYTE)) != 0
    }

    /// Number of lit pixels.
    pub fn lit_count(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::blank()
    }
}

impl fmt::Debug for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screen")
            .field("lit_pixels", &self.lit_count())
            .finish()
    }
}
