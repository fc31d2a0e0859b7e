use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::dataset::{SlideDataset, Split};
use crate::slide::{LabelledBoxes, SlideContainer, SlideResult};

/// One extracted training/test sample.
#[derive(Debug, Clone)]
pub struct PatchSample {
    pub slide_index: usize,
    /// Top-left corner in level coordinates.
    pub x: i64,
    pub y: i64,
    pub image: RgbImage,
    /// Boxes fully inside the patch, patch-relative.
    pub boxes: LabelledBoxes,
}

/// Sample one patch from `container` using its sampling policy.
pub fn draw_patch(
    container: &SlideContainer,
    slide_index: usize,
    rng: &mut dyn RngCore,
) -> SlideResult<PatchSample> {
    let (x, y) = container.sample(rng);
    let image = container.get_patch(x, y)?;

    Ok(PatchSample {
        slide_index,
        x,
        y,
        image,
        boxes: container.boxes_in_patch(x, y),
    })
}

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Endless stream of patches from the slides of one split. Each step picks a
/// slide uniformly at random and lets its policy choose the location.
pub struct PatchGenerator<'a> {
    dataset: &'a SlideDataset,
    indices: &'a [usize],
    rng: StdRng,
}

impl<'a> PatchGenerator<'a> {
    pub fn new(dataset: &'a SlideDataset, split: Split, seed: Option<u64>) -> Self {
        Self {
            dataset,
            indices: dataset.split(split),
            rng: seeded_rng(seed),
        }
    }
}

impl Iterator for PatchGenerator<'_> {
    type Item = SlideResult<PatchSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.indices.is_empty() {
            return None;
        }

        let slide_index = self.indices[self.rng.random_range(0..self.indices.len())];
        let container = &self.dataset.files[slide_index];
        Some(draw_patch(container, slide_index, &mut self.rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::load_slides;
    use crate::dataset::tests::fixture;
    use crate::slide::PyramidOpener;

    #[tokio::test]
    async fn test_generator_stays_within_split() {
        let dir = tempfile::tempdir().unwrap();
        let (db, options) = fixture(dir.path()).await;
        let dataset = load_slides(&db, &PyramidOpener::default(), &options)
            .await
            .unwrap();

        let samples: Vec<_> = PatchGenerator::new(&dataset, Split::Training, Some(1))
            .take(200)
            .collect::<SlideResult<_>>()
            .unwrap();

        assert_eq!(samples.len(), 200);
        for sample in &samples {
            assert_eq!(sample.slide_index, 0);
            assert_eq!(sample.image.dimensions(), (64, 64));
            for bbox in &sample.boxes.bboxes {
                assert!(bbox.left() > 0 && bbox.right() < 64);
                assert!(bbox.top() > 0 && bbox.bottom() < 64);
            }
        }

        // half of the draws aim at a box
        assert!(samples.iter().any(|s| !s.boxes.is_empty()));
    }

    #[tokio::test]
    async fn test_generator_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let (db, options) = fixture(dir.path()).await;
        let dataset = load_slides(&db, &PyramidOpener::default(), &options)
            .await
            .unwrap();

        let coords = |seed| {
            PatchGenerator::new(&dataset, Split::Test, Some(seed))
                .take(5)
                .map(|s| s.map(|s| (s.slide_index, s.x, s.y)).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(coords(7), coords(7));
    }

    #[test]
    fn test_empty_split_yields_nothing() {
        let dataset = SlideDataset::default();
        assert!(PatchGenerator::new(&dataset, Split::Test, None).next().is_none());
    }
}
