use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{SlideError, SlideOpener, SlideResult, SlideSource, level_location};

/// Default number of pyramid levels built for a decoded raster.
pub const DEFAULT_MAX_LEVELS: usize = 4;

/// In-memory resolution pyramid over a decoded raster image. Each level halves
/// the previous one until `max_levels` is reached or an edge would vanish.
pub struct ImagePyramid {
    levels: Vec<RgbaImage>,
    downsamples: Vec<f64>,
}

impl ImagePyramid {
    pub fn from_image(base: RgbaImage, max_levels: usize) -> Self {
        let (base_width, base_height) = base.dimensions();
        let mut levels = vec![base];

        while levels.len() < max_levels.max(1) {
            let next = {
                let prev = &levels[levels.len() - 1];
                let (width, height) = (prev.width() / 2, prev.height() / 2);
                if width == 0 || height == 0 {
                    break;
                }
                imageops::resize(prev, width, height, FilterType::Triangle)
            };
            levels.push(next);
        }

        // Same convention as openslide: average of the per-axis ratios.
        let downsamples = levels
            .iter()
            .map(|level| {
                let sx = base_width as f64 / level.width() as f64;
                let sy = base_height as f64 / level.height() as f64;
                (sx + sy) / 2.0
            })
            .collect();

        Self {
            levels,
            downsamples,
        }
    }
}

impl SlideSource for ImagePyramid {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self) -> Vec<(u32, u32)> {
        self.levels.iter().map(|level| level.dimensions()).collect()
    }

    fn level_downsamples(&self) -> Vec<f64> {
        self.downsamples.clone()
    }

    fn read_region(
        &self,
        location: (i64, i64),
        level: usize,
        size: (u32, u32),
    ) -> SlideResult<RgbaImage> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(SlideError::EmptyRegion { width, height });
        }

        let image = self.levels.get(level).ok_or(SlideError::LevelOutOfRange {
            level,
            level_count: self.levels.len(),
        })?;
        let downsample = self.downsamples[level];

        let (level_x, level_y) = level_location(location, downsample)?;

        let mut region = RgbaImage::new(width, height);
        imageops::replace(&mut region, image, -level_x, -level_y);

        Ok(region)
    }
}

/// Opens any raster format the `image` crate can decode as an
/// [`ImagePyramid`].
#[derive(Debug, Clone)]
pub struct PyramidOpener {
    max_levels: usize,
}

impl PyramidOpener {
    pub fn new(max_levels: usize) -> Self {
        Self { max_levels }
    }
}

impl Default for PyramidOpener {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVELS)
    }
}

impl SlideOpener for PyramidOpener {
    fn open(&self, path: &Path) -> SlideResult<Arc<dyn SlideSource>> {
        let decoded = image::open(path).map_err(|e| SlideError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let pyramid = ImagePyramid::from_image(decoded.to_rgba8(), self.max_levels);
        debug!(
            "Opened {} with {} levels",
            path.display(),
            pyramid.level_count()
        );

        Ok(Arc::new(pyramid))
    }
}
