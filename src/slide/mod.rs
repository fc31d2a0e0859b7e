pub mod container;
pub mod error;
pub mod format;
#[cfg(feature = "openslide")]
pub mod openslide;
pub mod pyramid;

pub use container::*;
pub use error::*;
pub use format::*;
#[cfg(feature = "openslide")]
pub use openslide::*;
pub use pyramid::*;

use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;

/// A multi-resolution slide. Level 0 is full resolution; every further level
/// is a downsampled copy.
pub trait SlideSource: Send + Sync {
    fn level_count(&self) -> usize;

    /// `(width, height)` of every level, level 0 first.
    fn level_dimensions(&self) -> Vec<(u32, u32)>;

    /// Downsample factor of every level relative to level 0.
    fn level_downsamples(&self) -> Vec<f64>;

    /// Read a `size` region of `level` whose top-left corner is `location`,
    /// given in level-0 coordinates. Pixels outside the slide come back
    /// fully transparent.
    fn read_region(
        &self,
        location: (i64, i64),
        level: usize,
        size: (u32, u32),
    ) -> SlideResult<RgbaImage>;
}

/// Opens slide files. The dataset loader only talks to slides through this
/// seam, so a native WSI codec can be plugged in without touching it.
pub trait SlideOpener: Send + Sync {
    fn open(&self, path: &Path) -> SlideResult<Arc<dyn SlideSource>>;
}

/// Largest coordinate magnitude a region location may have.
pub const MAX_COORDINATE: f64 = u32::MAX as f64;

/// Truncate a scaled coordinate to an integer, or `None` when it cannot be
/// addressed on any slide.
pub(crate) fn checked_coordinate(value: f64) -> Option<i64> {
    (value.is_finite() && value.abs() <= MAX_COORDINATE).then_some(value as i64)
}

/// Map a level-0 location onto `downsample`, flooring like openslide does.
pub(crate) fn level_location(location: (i64, i64), downsample: f64) -> SlideResult<(i64, i64)> {
    let out_of_range = || SlideError::LocationOutOfRange {
        x: location.0,
        y: location.1,
    };
    let x = checked_coordinate((location.0 as f64 / downsample).floor()).ok_or_else(out_of_range)?;
    let y = checked_coordinate((location.1 as f64 / downsample).floor()).ok_or_else(out_of_range)?;
    Ok((x, y))
}
