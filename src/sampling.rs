// Patch sampling policies.
//
// A policy picks the top-left corner of the next patch in level coordinates;
// the slide container turns that into pixels.

use rand::{Rng, RngCore};

use crate::slide::LabelledBoxes;

/// Scale applied to the random offset drawn from `[-w, w]` / `[-h, h]`.
const RANDOM_OFFSET_SCALE: f64 = 0.5;

/// Everything a policy may look at when choosing a patch location.
pub struct SampleContext<'a> {
    /// `(height, width)` of the patch.
    pub size: (u32, u32),
    pub level: usize,
    pub level_dimensions: &'a [(u32, u32)],
    pub y: &'a LabelledBoxes,
}

impl SampleContext<'_> {
    fn slide_dimensions(&self) -> (i64, i64) {
        self.level_dimensions
            .get(self.level)
            .map(|&(w, h)| (w as i64, h as i64))
            .unwrap_or((0, 0))
    }
}

pub trait PatchSampler: Send + Sync {
    fn sample(&self, ctx: &SampleContext<'_>, rng: &mut dyn RngCore) -> (i64, i64);
}

/// Uniform inclusive draw that tolerates an inverted range by returning the
/// lower bound.
fn randint(rng: &mut dyn RngCore, low: i64, high: i64) -> i64 {
    if high < low {
        low
    } else {
        rng.random_range(low..=high)
    }
}

/// Uniformly random patch location with a random half-patch offset. Knows
/// nothing about annotations, so most draws are negatives.
#[derive(Debug, Clone)]
pub struct RandomOffsetSampler {
    negative_class: i64,
}

impl RandomOffsetSampler {
    pub fn new(negative_class: i64) -> Self {
        Self { negative_class }
    }

    pub fn negative_class(&self) -> i64 {
        self.negative_class
    }
}

impl PatchSampler for RandomOffsetSampler {
    fn sample(&self, ctx: &SampleContext<'_>, rng: &mut dyn RngCore) -> (i64, i64) {
        let (h, w) = (ctx.size.0 as i64, ctx.size.1 as i64);
        let (half_w, half_h) = (w as f64 / 2.0, h as f64 / 2.0);

        let xoffset = rng.random_range(-w..=w) as f64 * RANDOM_OFFSET_SCALE;
        let yoffset = rng.random_range(-h..=h) as f64 * RANDOM_OFFSET_SCALE;

        let (slide_width, slide_height) = ctx.slide_dimensions();

        let xmin = randint(rng, (half_w - xoffset) as i64, slide_width - w);
        let ymin = randint(rng, (half_h - yoffset) as i64, slide_height - h);

        (
            (xmin as f64 - half_w + xoffset) as i64,
            (ymin as f64 - half_h + yoffset) as i64,
        )
    }
}

/// Draws a positive patch centred on a random annotated box with probability
/// `positive_fraction`, and a [`RandomOffsetSampler`] patch otherwise.
#[derive(Debug, Clone)]
pub struct MixedSampler {
    positive_fraction: f64,
    negatives: RandomOffsetSampler,
}

impl MixedSampler {
    /// `positive_fraction` is clamped into `[0, 1]`.
    pub fn new(positive_fraction: f64, negative_class: i64) -> Self {
        Self {
            positive_fraction: positive_fraction.clamp(0.0, 1.0),
            negatives: RandomOffsetSampler::new(negative_class),
        }
    }

    pub fn positive_fraction(&self) -> f64 {
        self.positive_fraction
    }

    pub fn negative_class(&self) -> i64 {
        self.negatives.negative_class()
    }
}

impl PatchSampler for MixedSampler {
    fn sample(&self, ctx: &SampleContext<'_>, rng: &mut dyn RngCore) -> (i64, i64) {
        if ctx.y.is_empty()
            || self.positive_fraction <= 0.0
            || !rng.random_bool(self.positive_fraction)
        {
            return self.negatives.sample(ctx, rng);
        }

        let (h, w) = (ctx.size.0 as i64, ctx.size.1 as i64);
        let (slide_width, slide_height) = ctx.slide_dimensions();

        let target = rng.random_range(0..ctx.y.len());
        let (cx, cy) = ctx.y.bboxes[target].center();
        let jitter_x = rng.random_range(-(w / 4)..=w / 4);
        let jitter_y = rng.random_range(-(h / 4)..=h / 4);

        let x = (cx - w / 2 + jitter_x).clamp(0, (slide_width - w).max(0));
        let y = (cy - h / 2 + jitter_y).clamp(0, (slide_height - h).max(0));
        (x, y)
    }
}
