//! Whole-slide images through the openslide C library.
//!
//! Only the requested region is decoded; level geometry is read once when the
//! slide is opened.

use image::RgbaImage;
use image::imageops;
use openslide_rs::traits::Slide;
use openslide_rs::{Address, OpenSlide, Region, Size};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{SlideError, SlideOpener, SlideResult, SlideSource, level_location};

pub struct OpenSlideSource {
    path: PathBuf,
    slide: Mutex<OpenSlide>,
    dimensions: Vec<(u32, u32)>,
    downsamples: Vec<f64>,
}

fn open_error(path: &Path, reason: impl ToString) -> SlideError {
    SlideError::Open {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl OpenSlideSource {
    pub fn open(path: &Path) -> SlideResult<Self> {
        let slide = OpenSlide::new(path).map_err(|e| open_error(path, e))?;

        let level_count = slide.get_level_count().map_err(|e| open_error(path, e))?;
        let mut dimensions = Vec::with_capacity(level_count as usize);
        let mut downsamples = Vec::with_capacity(level_count as usize);
        for level in 0..level_count {
            let size = slide
                .get_level_dimensions(level)
                .map_err(|e| open_error(path, e))?;
            dimensions.push((size.w, size.h));
            downsamples.push(
                slide
                    .get_level_downsample(level)
                    .map_err(|e| open_error(path, e))?,
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            slide: Mutex::new(slide),
            dimensions,
            downsamples,
        })
    }

    fn read_error(&self, reason: impl ToString) -> SlideError {
        open_error(&self.path, reason)
    }
}

impl SlideSource for OpenSlideSource {
    fn level_count(&self) -> usize {
        self.dimensions.len()
    }

    fn level_dimensions(&self) -> Vec<(u32, u32)> {
        self.dimensions.clone()
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
        let (level_width, level_height) =
            *self
                .dimensions
                .get(level)
                .ok_or(SlideError::LevelOutOfRange {
                    level,
                    level_count: self.dimensions.len(),
                })?;
        let downsample = self.downsamples[level];
        let (level_x, level_y) = level_location(location, downsample)?;

        // Addresses are unsigned, so only the part overlapping the level is
        // read and the rest stays transparent.
        let x0 = level_x.max(0);
        let y0 = level_y.max(0);
        let x1 = (level_x + width as i64).min(level_width as i64);
        let y1 = (level_y + height as i64).min(level_height as i64);

        let mut region = RgbaImage::new(width, height);
        if x1 <= x0 || y1 <= y0 {
            return Ok(region);
        }

        let (read_width, read_height) = ((x1 - x0) as u32, (y1 - y0) as u32);
        let request = Region {
            address: Address {
                x: (x0 as f64 * downsample) as u32,
                y: (y0 as f64 * downsample) as u32,
            },
            level: level as u32,
            size: Size {
                w: read_width,
                h: read_height,
            },
        };

        let pixels = {
            let slide = self
                .slide
                .lock()
                .map_err(|_e| self.read_error("slide handle poisoned"))?;
            slide.read_region(&request).map_err(|e| self.read_error(e))?
        };
        let tile = RgbaImage::from_raw(read_width, read_height, pixels)
            .ok_or_else(|| self.read_error("region buffer has the wrong size"))?;

        imageops::replace(&mut region, &tile, x0 - level_x, y0 - level_y);
        Ok(region)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSlideOpener;

impl SlideOpener for OpenSlideOpener {
    fn open(&self, path: &Path) -> SlideResult<Arc<dyn SlideSource>> {
        let source = OpenSlideSource::open(path)?;
        debug!(
            "Opened whole-slide image {} with {} levels",
            path.display(),
            source.level_count()
        );
        Ok(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file() {
        let err = OpenSlideOpener
            .open(Path::new("/nonexistent/slide.svs"))
            .err()
            .unwrap();
        assert!(matches!(err, SlideError::Open { .. }));
    }
}
