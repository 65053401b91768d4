//! Named reference screens.
//!
//! A pattern is either exact (the whole frame must match byte for byte) or a
//! mask (only its lit pixels must be lit on screen). Masks let a pattern
//! describe a single icon or region while the rest of the display animates.

use serde::{Deserialize, Serialize};

use crate::art::{self, ArtError};
use crate::screen::Screen;

/// A persisted, immutable reference screen.
///
/// Unlike a polled [`Screen`], a pattern cannot be overwritten after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredPattern", into = "StoredPattern")]
pub struct PatternRecord {
    id: String,
    is_error: bool,
    is_mask: bool,
    screen: Screen,
}

impl PatternRecord {
    /// An exact-match pattern.
    pub fn exact(id: impl Into<String>, is_error: bool, screen: Screen) -> Self {
        Self {
            id: id.into(),
            is_error,
            is_mask: false,
            screen,
        }
    }

    /// A wildcard mask pattern.
    pub fn mask(id: impl Into<String>, is_error: bool, screen: Screen) -> Self {
        Self {
            id: id.into(),
            is_error,
            is_mask: true,
            screen,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this pattern belongs to the error partition.
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn is_mask(&self) -> bool {
        self.is_mask
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Whether `candidate` shows this pattern.
    pub fn fits(&self, candidate: &Screen) -> bool {
        if self.is_mask {
            candidate.covers(&self.screen)
        } else {
            *candidate == self.screen
        }
    }
}

/// On-disk shape of a pattern.
#[derive(Serialize, Deserialize)]
struct StoredPattern {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "IsError")]
    is_error: bool,
    #[serde(rename = "IsMask")]
    is_mask: bool,
    #[serde(rename = "ScreenRecordGraphicArray")]
    lines: Vec<String>,
}

impl TryFrom<StoredPattern> for PatternRecord {
    type Error = ArtError;

    fn try_from(stored: StoredPattern) -> Result<Self, Self::Error> {
        Ok(Self {
            screen: art::decode(&stored.lines)?,
            id: stored.id,
            is_error: stored.is_error,
            is_mask: stored.is_mask,
        })
    }
}

impl From<PatternRecord> for StoredPattern {
    fn from(record: PatternRecord) -> Self {
        Self {
            lines: art::encode(&record.screen),
            id: record.id,
            is_error: record.is_error,
            is_mask: record.is_mask,
        }
    }
}
