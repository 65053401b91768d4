//! Bitmap-art transcoding of framebuffers.
//!
//! A frame is written as one text line per pixel row (64 lines of 128
//! glyphs). `'0'` marks a lit pixel and `'.'` a dark one, which keeps stored
//! patterns readable and diffable.

use thiserror::Error;

use crate::screen::{Screen, PIXELS_PER_BYTE, PLANE_COUNT, PLANE_WIDTH, SCREEN_LEN};

pub const LIT: char = '0';
pub const DARK: char = '.';

/// Number of text lines in one frame.
pub const LINE_COUNT: usize = PLANE_COUNT * PIXELS_PER_BYTE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtError {
    #[error("expected {LINE_COUNT} lines, got {0}")]
    LineCount(usize),
    #[error("line {line} has {width} glyphs, expected {PLANE_WIDTH}")]
    LineWidth { line: usize, width: usize },
    #[error("invalid glyph {glyph:?} at line {line}, column {column}")]
    Glyph {
        line: usize,
        column: usize,
        glyph: char,
    },
}

/// Render a frame as bitmap-art lines.
pub fn encode(screen: &Screen) -> Vec<String> {
    let bytes = screen.as_bytes();
    let mut lines = Vec::with_capacity(LINE_COUNT);
    for plane in 0..PLANE_COUNT {
        let row = &bytes[plane * PLANE_WIDTH..(plane + 1) * PLANE_WIDTH];
        for bit in 0..PIXELS_PER_BYTE {
            let line = row
                .iter()
                .map(|b| if b & (1 << bit) != 0 { LIT } else { DARK })
                .collect();
            lines.push(line);
        }
    }
    lines
}

/// Parse bitmap-art lines back into a frame.
pub fn decode<S: AsRef<str>>(lines: &[S]) -> Result<Screen, ArtError> {
    if lines.len() != LINE_COUNT {
        return Err(ArtError::LineCount(lines.len()));
    }

    let mut bytes = [0u8; SCREEN_LEN];
    for (index, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        let width = line.chars().count();
        if width != PLANE_WIDTH {
            return Err(ArtError::LineWidth { line: index, width });
        }

        let plane = index / PIXELS_PER_BYTE;
        let bit = index % PIXELS_PER_BYTE;
        for (column, glyph) in line.chars().enumerate() {
            match glyph {
                LIT => bytes[plane * PLANE_WIDTH + column] |= 1 << bit,
                DARK => {}
                other => {
                    return Err(ArtError::Glyph {
                        line: index,
                        column,
                        glyph: other,
                    })
                }
            }
        }
    }
    Ok(Screen::from_array(bytes))
}
