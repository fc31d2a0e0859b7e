use image::{DynamicImage, RgbImage};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{SlideError, SlideResult, SlideSource, checked_coordinate};
use crate::geometry::BoundingBox;
use crate::sampling::{PatchSampler, SampleContext};

/// Boxes of one slide with their training labels, kept as parallel lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelledBoxes {
    pub bboxes: Vec<BoundingBox>,
    pub labels: Vec<u32>,
}

impl LabelledBoxes {
    pub fn push(&mut self, bbox: BoundingBox, label: u32) {
        self.bboxes.push(bbox);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BoundingBox, &u32)> {
        self.bboxes.iter().zip(self.labels.iter())
    }
}

/// Every box of one annotation class on a slide, with the raw class id
/// repeated per box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassAnnotations {
    pub bboxes: Vec<BoundingBox>,
    pub label: Vec<i64>,
}

/// One slide prepared for patch extraction.
pub struct SlideContainer {
    file: PathBuf,
    slide: Arc<dyn SlideSource>,
    width: u32,
    height: u32,
    level: usize,
    down_factor: f64,
    y: LabelledBoxes,
    annotations: BTreeMap<i64, ClassAnnotations>,
    sampler: Arc<dyn PatchSampler>,
    classes: Vec<u32>,
}

impl SlideContainer {
    /// `level = None` selects the last pyramid level.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file: impl Into<PathBuf>,
        slide: Arc<dyn SlideSource>,
        annotations: BTreeMap<i64, ClassAnnotations>,
        y: LabelledBoxes,
        level: Option<usize>,
        width: u32,
        height: u32,
        sampler: Arc<dyn PatchSampler>,
    ) -> SlideResult<Self> {
        let level_count = slide.level_count();
        let level = level.unwrap_or(level_count.saturating_sub(1));
        let down_factor = slide
            .level_downsamples()
            .get(level)
            .copied()
            .ok_or(SlideError::LevelOutOfRange { level, level_count })?;

        let mut classes = y.labels.clone();
        classes.sort_unstable();
        classes.dedup();

        Ok(Self {
            file: file.into(),
            slide,
            width,
            height,
            level,
            down_factor,
            y,
            annotations,
            sampler,
            classes,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn slide(&self) -> &Arc<dyn SlideSource> {
        &self.slide
    }

    /// `(width, height)` of every patch.
    pub fn shape(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn down_factor(&self) -> f64 {
        self.down_factor
    }

    pub fn y(&self) -> &LabelledBoxes {
        &self.y
    }

    pub fn annotations(&self) -> &BTreeMap<i64, ClassAnnotations> {
        &self.annotations
    }

    pub fn classes(&self) -> &[u32] {
        &self.classes
    }

    /// Extract the patch whose top-left corner is `(x, y)` in level
    /// coordinates. The returned image is `width x height` RGB, i.e. a
    /// `(height, width, 3)` pixel array.
    pub fn get_patch(&self, x: i64, y: i64) -> SlideResult<RgbImage> {
        let out_of_range = || SlideError::LocationOutOfRange { x, y };
        let location = (
            checked_coordinate(x as f64 * self.down_factor).ok_or_else(out_of_range)?,
            checked_coordinate(y as f64 * self.down_factor).ok_or_else(out_of_range)?,
        );
        let region = self
            .slide
            .read_region(location, self.level, (self.width, self.height))?;

        Ok(DynamicImage::ImageRgba8(region).to_rgb8())
    }

    /// Ask the slide's sampling policy for the top-left corner of a patch.
    pub fn sample(&self, rng: &mut dyn RngCore) -> (i64, i64) {
        let level_dimensions = self.slide.level_dimensions();
        let ctx = SampleContext {
            size: (self.height, self.width),
            level: self.level,
            level_dimensions: &level_dimensions,
            y: &self.y,
        };
        self.sampler.sample(&ctx, rng)
    }

    /// Boxes lying strictly inside the patch at `(x, y)`, shifted into
    /// patch-relative coordinates.
    pub fn boxes_in_patch(&self, x: i64, y: i64) -> LabelledBoxes {
        let mut inside = LabelledBoxes::default();
        for (bbox, label) in self.y.iter() {
            if bbox.within_patch(x, y, self.width as i64, self.height as i64) {
                inside.push(bbox.translate(-x, -y), *label);
            }
        }
        inside
    }
}

impl fmt::Debug for SlideContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlideContainer")
            .field("file", &self.file)
            .field("level", &self.level)
            .field("down_factor", &self.down_factor)
            .field("shape", &self.shape())
            .field("boxes", &self.y.len())
            .field("classes", &self.classes)
            .finish()
    }
}
