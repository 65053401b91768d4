//! Register codec for the capture microcontroller.
//!
//! The microcontroller exposes three kinds of registers:
//!
//! | Register | Access | Content |
//! |----------|--------|---------|
//! | Input (address 0) | read | button-pushed bits, status bits |
//! | Holding (address 0) | write | button-push bits, feature toggles |
//! | Screen blocks (1000..5000) | read | raw display bus capture |
//!
//! All types here are pure bit manipulation; no I/O happens in this module.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::screen::{Screen, PLANE_COUNT, PLANE_WIDTH, SCREEN_LEN};

/// Address of the status (input) register.
pub const INPUT_REGISTER_ADDRESS: u16 = 0;

/// Address of the command (holding) register.
pub const HOLDING_REGISTER_ADDRESS: u16 = 0;

/// Start addresses of the register blocks carrying one captured frame.
pub const SCREEN_BLOCK_ADDRESSES: [u16; 5] = [1000, 2000, 3000, 4000, 5000];

/// Number of 16-bit registers in one screen block.
pub const SCREEN_BLOCK_LEN: u16 = 107;

/// Length of one raw display bus capture in bytes.
pub const RAW_CAPTURE_LEN: usize = 1063;

/// Bytes preceding the first plane in a raw capture.
const GLOBAL_HEADER_LEN: usize = 15;

/// Bytes preceding each plane in a raw capture.
const PLANE_HEADER_LEN: usize = 3;

/// Physical buttons on the appliance control panel.
///
/// The discriminant is the bit position shared by the input register
/// (button-pushed feedback) and the holding register (push command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Espresso = 0,
    Latte = 1,
    Cappuccino = 2,
    Menu = 3,
    Aroma = 6,
    Coffee = 7,
    Power = 8,
}

impl Button {
    pub const ALL: [Button; 7] = [
        Button::Espresso,
        Button::Latte,
        Button::Cappuccino,
        Button::Menu,
        Button::Aroma,
        Button::Coffee,
        Button::Power,
    ];

    fn mask(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Button::Espresso => "espresso",
            Button::Latte => "latte",
            Button::Cappuccino => "cappuccino",
            Button::Menu => "menu",
            Button::Aroma => "aroma",
            Button::Coffee => "coffee",
            Button::Power => "power",
        };
        f.write_str(name)
    }
}

/// Feature toggles carried in the upper byte of the holding register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Keep a pushed button held instead of auto-releasing after 200ms.
    ButtonClearDisabled = 10,
}

impl Feature {
    fn mask(self) -> u16 {
        1 << (self as u16)
    }
}

const MANUAL_PUSH_BIT: u16 = 1 << 4;
const PUSH_FAILED_BIT: u16 = 1 << 5;
const POWERED_BIT: u16 = 1 << 10;
const STANDBY_BIT: u16 = 1 << 11;
const ERROR_SCREEN_BIT: u16 = 1 << 12;
const RUNNING_SCREEN_BIT: u16 = 1 << 13;
const CAPTURE_HEALTHY_BIT: u16 = 1 << 14;
const REGISTER_HEALTHY_BIT: u16 = 1 << 15;

/// Low 9 bits: every button position, including the power button.
const BUTTON_BITS: u16 = 0b0000_0001_1111_1111;

/// Decoded status register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputRegister(u16);

impl InputRegister {
    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    /// Whether the microcontroller reports `button` as currently held.
    pub fn is_pushed(self, button: Button) -> bool {
        self.0 & button.mask() != 0
    }

    /// A human pressed a physical button.
    pub fn manual_push_detected(self) -> bool {
        self.0 & MANUAL_PUSH_BIT != 0
    }

    /// The microcontroller could not complete a push.
    ///
    /// The firmware occasionally reports this spuriously, so callers treat
    /// it as a warning and verify pushes themselves.
    pub fn push_failed(self) -> bool {
        self.0 & PUSH_FAILED_BIT != 0
    }

    /// Mains power is present and the appliance is switched on.
    ///
    /// Lags slightly behind the screen lighting up after power-on.
    pub fn is_powered(self) -> bool {
        self.0 & POWERED_BIT != 0
    }

    pub fn is_standby(self) -> bool {
        self.0 & STANDBY_BIT != 0
    }

    /// The screen is lit in either color.
    pub fn is_active(self) -> bool {
        self.is_error_screen() || self.is_running_screen()
    }

    /// Red backlight: the appliance shows an error.
    pub fn is_error_screen(self) -> bool {
        self.0 & ERROR_SCREEN_BIT != 0
    }

    /// White backlight: the appliance runs normally.
    pub fn is_running_screen(self) -> bool {
        self.0 & RUNNING_SCREEN_BIT != 0
    }

    pub fn capture_healthy(self) -> bool {
        self.0 & CAPTURE_HEALTHY_BIT != 0
    }

    pub fn register_handler_healthy(self) -> bool {
        self.0 & REGISTER_HEALTHY_BIT != 0
    }
}

impl fmt::Display for InputRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "input register 0x{:04x}", self.0)?;
        for button in Button::ALL {
            writeln!(f, "  {} pushed: {}", button, self.is_pushed(button))?;
        }
        writeln!(f, "  manual push: {}", self.manual_push_detected())?;
        writeln!(f, "  push failed: {}", self.push_failed())?;
        writeln!(f, "  powered: {}", self.is_powered())?;
        writeln!(f, "  standby: {}", self.is_standby())?;
        writeln!(f, "  error screen: {}", self.is_error_screen())?;
        writeln!(f, "  running screen: {}", self.is_running_screen())?;
        writeln!(f, "  capture healthy: {}", self.capture_healthy())?;
        write!(f, "  register handler healthy: {}", self.register_handler_healthy())
    }
}

/// Command register under construction.
///
/// Every button and feature owns one bit; setting one never disturbs another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandRegister(u16);

impl CommandRegister {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn push(&mut self, button: Button) {
        self.0 |= button.mask();
    }

    pub fn release(&mut self, button: Button) {
        self.0 &= !button.mask();
    }

    /// Release every button, keeping feature bits.
    pub fn release_all(&mut self) {
        self.0 &= !BUTTON_BITS;
    }

    pub fn enable(&mut self, feature: Feature) {
        self.0 |= feature.mask();
    }

    pub fn disable(&mut self, feature: Feature) {
        self.0 &= !feature.mask();
    }
}

/// Reassemble one framebuffer from the screen register blocks.
///
/// Words are little-endian byte pairs of the raw display bus capture. The
/// capture starts with a global header, then each plane carries its own
/// header followed by one byte per column. Bytes past the capture length are
/// ignored.
///
/// # Panics
///
/// Panics if the blocks hold fewer than [`RAW_CAPTURE_LEN`] bytes. Callers
/// read complete blocks before assembling.
pub fn assemble_framebuffer<B: AsRef<[u16]>>(blocks: &[B]) -> Screen {
    let raw: Vec<u8> = blocks
        .iter()
        .flat_map(|block| block.as_ref().iter().flat_map(|word| word.to_le_bytes()))
        .take(RAW_CAPTURE_LEN)
        .collect();

    assert!(
        raw.len() == RAW_CAPTURE_LEN,
        "screen capture truncated: {} of {} bytes",
        raw.len(),
        RAW_CAPTURE_LEN
    );

    let mut pixels = [0u8; SCREEN_LEN];
    let mut cursor = GLOBAL_HEADER_LEN;
    for plane in 0..PLANE_COUNT {
        cursor += PLANE_HEADER_LEN;
        pixels[plane * PLANE_WIDTH..(plane + 1) * PLANE_WIDTH]
            .copy_from_slice(&raw[cursor..cursor + PLANE_WIDTH]);
        cursor += PLANE_WIDTH;
    }
    Screen::from_array(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits_decode_independently() {
        let reg = InputRegister::new(POWERED_BIT | RUNNING_SCREEN_BIT | CAPTURE_HEALTHY_BIT);
        assert!(reg.is_powered());
        assert!(reg.is_running_screen());
        assert!(reg.is_active());
        assert!(reg.capture_healthy());
        assert!(!reg.is_error_screen());
        assert!(!reg.is_standby());
        assert!(!reg.register_handler_healthy());
        assert!(!reg.manual_push_detected());
    }

    #[test]
    fn error_screen_counts_as_active() {
        let reg = InputRegister::new(ERROR_SCREEN_BIT);
        assert!(reg.is_active());
        assert!(reg.is_error_screen());
        assert!(!reg.is_running_screen());
    }

    #[test]
    fn button_bits_match_positions() {
        let reg = InputRegister::new(1 << 6 | 1 << 8);
        assert!(reg.is_pushed(Button::Aroma));
        assert!(reg.is_pushed(Button::Power));
        assert!(!reg.is_pushed(Button::Espresso));
        assert!(!reg.is_pushed(Button::Coffee));
    }

    #[test]
    fn manual_and_failed_bits() {
        let reg = InputRegister::new(0b0011_0000);
        assert!(reg.manual_push_detected());
        assert!(reg.push_failed());
        for button in Button::ALL {
            assert!(!reg.is_pushed(button), "{button} should not read as pushed");
        }
    }

    #[test]
    fn pushing_one_button_leaves_others_alone() {
        let mut cmd = CommandRegister::new();
        cmd.enable(Feature::ButtonClearDisabled);
        cmd.push(Button::Menu);
        cmd.push(Button::Coffee);
        cmd.release(Button::Menu);

        assert_eq!(cmd.raw(), 1 << 10 | 1 << 7);
    }

    #[test]
    fn release_all_keeps_features() {
        let mut cmd = CommandRegister::new();
        cmd.enable(Feature::ButtonClearDisabled);
        for button in Button::ALL {
            cmd.push(button);
        }
        cmd.release_all();
        assert_eq!(cmd.raw(), 1 << 10);

        cmd.disable(Feature::ButtonClearDisabled);
        assert_eq!(cmd.raw(), 0);
    }

    /// Build blocks whose byte stream is `header`, then per plane a row header
    /// and a run of bytes equal to `plane + 1`.
    fn synthetic_blocks(header_byte: u8) -> Vec<Vec<u16>> {
        let mut bytes = vec![header_byte; GLOBAL_HEADER_LEN];
        for plane in 0..PLANE_COUNT {
            bytes.extend([header_byte; PLANE_HEADER_LEN]);
            bytes.extend(std::iter::repeat(plane as u8 + 1).take(PLANE_WIDTH));
        }
        let total = SCREEN_BLOCK_ADDRESSES.len() * SCREEN_BLOCK_LEN as usize * 2;
        bytes.resize(total, 0xEE);

        bytes
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>()
            .chunks(SCREEN_BLOCK_LEN as usize)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    #[test]
    fn framebuffer_skips_headers() {
        for header in [0x00, 0xFF, 0x5A] {
            let screen = assemble_framebuffer(&synthetic_blocks(header));
            let bytes = screen.as_bytes();
            for plane in 0..PLANE_COUNT {
                let row = &bytes[plane * PLANE_WIDTH..(plane + 1) * PLANE_WIDTH];
                assert!(
                    row.iter().all(|&b| b == plane as u8 + 1),
                    "plane {plane} polluted with header {header:#x}"
                );
            }
        }
    }

    #[test]
    fn framebuffer_ignores_trailing_bytes() {
        let mut blocks = synthetic_blocks(0);
        let expected = assemble_framebuffer(&blocks);
        for word in blocks.last_mut().unwrap().iter_mut().rev().take(3) {
            *word = 0xABCD;
        }
        assert_eq!(assemble_framebuffer(&blocks), expected);
    }

    #[test]
    #[should_panic(expected = "truncated")]
    fn framebuffer_rejects_short_capture() {
        let blocks = vec![vec![0u16; 10]];
        assemble_framebuffer(&blocks);
    }

    #[test]
    fn status_dump_names_every_button() {
        let dump = InputRegister::new(1 << 3).to_string();
        assert!(dump.contains("menu pushed: true"));
        assert!(dump.contains("power pushed: false"));
        assert!(dump.contains("0x0008"));
    }
}
