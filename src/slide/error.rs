//! Error types for slide access.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while opening or reading a slide.
#[derive(Debug, Clone)]
pub enum SlideError {
    /// The slide file could not be opened or decoded.
    Open { path: PathBuf, reason: String },

    /// A pyramid level outside `0..level_count` was requested.
    LevelOutOfRange { level: usize, level_count: usize },

    /// A region with a zero width or height was requested.
    EmptyRegion { width: u32, height: u32 },

    /// A region location too far from the slide to address.
    LocationOutOfRange { x: i64, y: i64 },
}

impl fmt::Display for SlideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, reason } => {
                write!(f, "Failed to open slide {}: {}", path.display(), reason)
            }
            Self::LevelOutOfRange { level, level_count } => write!(
                f,
                "Pyramid level {} out of range (slide has {} levels)",
                level, level_count
            ),
            Self::EmptyRegion { width, height } => {
                write!(f, "Empty region requested: {}x{}", width, height)
            }
            Self::LocationOutOfRange { x, y } => {
                write!(f, "Region location ({}, {}) is out of range", x, y)
            }
        }
    }
}

impl std::error::Error for SlideError {}

/// Result type for slide operations.
pub type SlideResult<T> = Result<T, SlideError>;
