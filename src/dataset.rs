//! Slide dataset assembly.
//!
//! One pass over the annotation database: every slide is opened, its live
//! spot annotations are turned into boxes, and slides carrying at least one
//! box of the positive class are partitioned into training and test sets.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SamplerConfig;
use crate::db::{AnnotationRecord, Db, QueryBuilder};
use crate::geometry::BoundingBox;
use crate::sampling::{MixedSampler, PatchSampler};
use crate::slide::{ClassAnnotations, LabelledBoxes, SlideContainer, SlideError, SlideOpener};

/// Label given to boxes of the positive class.
pub const POSITIVE_LABEL: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Training,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training => write!(f, "training"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "training" | "train" => Ok(Self::Training),
            "test" => Ok(Self::Test),
            other => Err(anyhow!("Unknown split `{}` (expected training or test)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub test_slide_ids: HashSet<i64>,
    pub base_path: PathBuf,
    pub size: u32,
    pub level: usize,
    pub positive_class: i64,
    pub negative_class: i64,
    pub spot_radius: f64,
    pub positive_fraction: f64,
    /// Log and skip slides whose file cannot be opened instead of failing.
    pub skip_missing: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from_config(&SamplerConfig::default(), "WSI", HashSet::new())
    }
}

impl LoadOptions {
    pub fn from_config(
        config: &SamplerConfig,
        base_path: impl Into<PathBuf>,
        test_slide_ids: HashSet<i64>,
    ) -> Self {
        Self {
            test_slide_ids,
            base_path: base_path.into(),
            size: config.size,
            level: config.level,
            positive_class: config.positive_class,
            negative_class: config.negative_class,
            spot_radius: config.spot_radius,
            positive_fraction: config.positive_fraction,
            skip_missing: false,
        }
    }
}

/// Slides ready for sampling. `files[i]`, `lbl_bbox[i]` and the slide id at
/// `i` describe the same slide; the split lists hold indices into `files`.
#[derive(Debug, Default)]
pub struct SlideDataset {
    pub lbl_bbox: Vec<LabelledBoxes>,
    pub training_slides: Vec<usize>,
    pub test_slides: Vec<usize>,
    pub files: Vec<SlideContainer>,
    slide_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlideSummary {
    pub index: usize,
    pub slide_id: i64,
    pub file: String,
    pub split: Split,
    pub boxes: usize,
    /// Annotation count per raw class id.
    pub classes: BTreeMap<i64, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub training_slides: usize,
    pub test_slides: usize,
    pub boxes: usize,
    pub slides: Vec<SlideSummary>,
}

impl SlideDataset {
    pub fn split(&self, split: Split) -> &[usize] {
        match split {
            Split::Training => &self.training_slides,
            Split::Test => &self.test_slides,
        }
    }

    pub fn slide_id(&self, index: usize) -> Option<i64> {
        self.slide_ids.get(index).copied()
    }

    pub fn split_of(&self, index: usize) -> Option<Split> {
        if self.test_slides.contains(&index) {
            Some(Split::Test)
        } else if self.training_slides.contains(&index) {
            Some(Split::Training)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn summary(&self) -> DatasetSummary {
        let slides = self
            .files
            .iter()
            .enumerate()
            .map(|(index, container)| SlideSummary {
                index,
                slide_id: self.slide_ids[index],
                file: container.file().display().to_string(),
                split: self.split_of(index).unwrap_or(Split::Training),
                boxes: container.y().len(),
                classes: container
                    .annotations()
                    .iter()
                    .map(|(class, entry)| (*class, entry.bboxes.len()))
                    .collect(),
            })
            .collect();

        DatasetSummary {
            training_slides: self.training_slides.len(),
            test_slides: self.test_slides.len(),
            boxes: self.lbl_bbox.iter().map(LabelledBoxes::len).sum(),
            slides,
        }
    }

    fn push(&mut self, slide_id: i64, container: SlideContainer, is_test: bool) {
        self.lbl_bbox.push(container.y().clone());
        self.files.push(container);
        self.slide_ids.push(slide_id);

        let index = self.files.len() - 1;
        if is_test {
            self.test_slides.push(index);
        } else {
            self.training_slides.push(index);
        }
    }
}

/// Turn the annotations of one slide into the class-indexed box map and the
/// positive-class boxes used for training.
///
/// Only non-deleted spot annotations contribute. Each one adds exactly one box
/// and class id to `annotations[agreed_class]`; those of the positive class
/// are also returned with [`POSITIVE_LABEL`].
pub fn index_annotations(
    records: &[AnnotationRecord],
    positive_class: i64,
    spot_radius: f64,
    down_factor: f64,
) -> (BTreeMap<i64, ClassAnnotations>, LabelledBoxes) {
    let classes: HashMap<i64, u32> = HashMap::from([(positive_class, POSITIVE_LABEL)]);

    let mut annotations: BTreeMap<i64, ClassAnnotations> = BTreeMap::new();
    let mut labelled = LabelledBoxes::default();

    for record in records {
        if !record.is_live_spot() {
            continue;
        }

        let Some((x, y)) = record.position() else {
            warn!("Spot annotation {} has no coordinates, skipping", record.uid);
            continue;
        };
        let Some(class) = record.agreed_class else {
            warn!("Spot annotation {} has no agreed class, skipping", record.uid);
            continue;
        };

        let bbox = BoundingBox::from_spot(x as f64, y as f64, spot_radius, down_factor);

        let entry = annotations.entry(class).or_default();
        entry.bboxes.push(bbox);
        entry.label.push(class);

        if let Some(&label) = classes.get(&class) {
            labelled.push(bbox, label);
        }
    }

    (annotations, labelled)
}

pub async fn load_slides(
    db: &Db,
    opener: &dyn SlideOpener,
    options: &LoadOptions,
) -> Result<SlideDataset> {
    let slides = QueryBuilder::list_slides(db).await?;
    info!("Loading {} slides...", slides.len());

    let sampler: Arc<dyn PatchSampler> = Arc::new(MixedSampler::new(
        options.positive_fraction,
        options.negative_class,
    ));

    let mut dataset = SlideDataset::default();

    for (idx, record) in slides.iter().enumerate() {
        let slide_path = options.base_path.join(&record.filename);
        let slide = match opener.open(&slide_path) {
            Ok(slide) => slide,
            Err(e) if options.skip_missing => {
                warn!("Skipping slide {}: {}", record.uid, e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let down_factor = slide
            .level_downsamples()
            .get(options.level)
            .copied()
            .ok_or(SlideError::LevelOutOfRange {
                level: options.level,
                level_count: slide.level_count(),
            })?;

        let records = QueryBuilder::load_annotations(db, record.uid).await?;
        let (annotations, labelled) = index_annotations(
            &records,
            options.positive_class,
            options.spot_radius,
            down_factor,
        );

        if labelled.is_empty() {
            debug!(
                "Slide {} ({}) has no boxes of class {}, dropped",
                record.uid, record.filename, options.positive_class
            );
            continue;
        }

        let is_test = options.test_slide_ids.contains(&record.uid);
        let container = SlideContainer::new(
            slide_path,
            slide,
            annotations,
            labelled,
            Some(options.level),
            options.size,
            options.size,
            sampler.clone(),
        )?;

        info!(
            "[{}/{}] slide {} ({}): {} boxes, {}",
            idx + 1,
            slides.len(),
            record.uid,
            record.filename,
            container.y().len(),
            if is_test { Split::Test } else { Split::Training }
        );
        dataset.push(record.uid, container, is_test);
    }

    info!(
        "Loaded {} slides ({} training, {} test)",
        dataset.len(),
        dataset.training_slides.len(),
        dataset.test_slides.len()
    );

    Ok(dataset)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{
        AnnotationCreate, AnnotationType, DatabaseConfig, create_connection, ensure_schema,
    };
    use crate::slide::PyramidOpener;
    use image::{Rgba, RgbaImage};
    use std::path::Path;

    pub(crate) fn write_slide(dir: &Path, name: &str, width: u32, height: u32) {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        image.save(dir.join(name)).unwrap();
    }

    /// Three slides: `a.png` (training, two positives), `b.png` (only
    /// negatives, dropped) and `c.png` (test, one positive).
    pub(crate) async fn fixture(dir: &Path) -> (Db, LoadOptions) {
        let db = create_connection(DatabaseConfig::with_url("sqlite::memory:"))
            .await
            .unwrap();
        ensure_schema(&db).await.unwrap();

        for name in ["a.png", "b.png", "c.png"] {
            write_slide(dir, name, 400, 300);
        }

        let a = QueryBuilder::insert_slide(&db, "a.png").await.unwrap();
        let b = QueryBuilder::insert_slide(&db, "b.png").await.unwrap();
        let c = QueryBuilder::insert_slide(&db, "c.png").await.unwrap();

        let spots = [
            AnnotationCreate::spot(a, 2, 100, 100),
            AnnotationCreate::spot(a, 2, 300, 200),
            AnnotationCreate::spot(a, 7, 50, 250),
            AnnotationCreate {
                deleted: true,
                ..AnnotationCreate::spot(a, 2, 200, 200)
            },
            AnnotationCreate {
                annotation_type: AnnotationType::Polygon,
                coordinates: vec![(10, 10), (20, 20), (10, 30)],
                ..AnnotationCreate::spot(a, 2, 0, 0)
            },
            AnnotationCreate::spot(b, 7, 120, 120),
            AnnotationCreate::spot(c, 2, 200, 150),
        ];
        for spot in &spots {
            QueryBuilder::insert_annotation(&db, spot).await.unwrap();
        }

        let options = LoadOptions {
            test_slide_ids: HashSet::from([c]),
            base_path: dir.to_path_buf(),
            size: 64,
            level: 0,
            positive_class: 2,
            negative_class: 7,
            spot_radius: 25.0,
            positive_fraction: 0.5,
            skip_missing: false,
        };

        (db, options)
    }

    #[tokio::test]
    async fn test_load_slides_partitions_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let (db, options) = fixture(dir.path()).await;

        let dataset = load_slides(&db, &PyramidOpener::default(), &options)
            .await
            .unwrap();

        // b.png has no positive boxes
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.lbl_bbox.len(), 2);
        assert_eq!(dataset.training_slides, vec![0]);
        assert_eq!(dataset.test_slides, vec![1]);
        assert_eq!(dataset.slide_id(0), Some(1));
        assert_eq!(dataset.slide_id(1), Some(3));

        let training = &dataset.files[0];
        assert_eq!(training.y().labels, vec![POSITIVE_LABEL, POSITIVE_LABEL]);
        assert_eq!(training.y().bboxes[0], BoundingBox::new(75, 75, 125, 125));
        assert_eq!(training.annotations()[&2].bboxes.len(), 2);
        assert_eq!(training.annotations()[&2].label, vec![2, 2]);
        assert_eq!(training.annotations()[&7].bboxes.len(), 1);
        assert_eq!(training.classes(), &[POSITIVE_LABEL]);
        assert_eq!(training.shape(), (64, 64));
        assert_eq!(dataset.lbl_bbox[0], *training.y());

        let summary = dataset.summary();
        assert_eq!(summary.training_slides, 1);
        assert_eq!(summary.test_slides, 1);
        assert_eq!(summary.boxes, 3);
        assert_eq!(summary.slides[1].split, Split::Test);
    }

    #[tokio::test]
    async fn test_boxes_follow_the_sampling_level() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mut options) = fixture(dir.path()).await;
        options.level = 1;

        let dataset = load_slides(&db, &PyramidOpener::default(), &options)
            .await
            .unwrap();

        // 400x300 -> 200x150 at level 1, downsample 2
        let training = &dataset.files[0];
        assert_eq!(training.level(), 1);
        assert_eq!(training.down_factor(), 2.0);

        // spot (100, 100), r = 25: x_min = 75 / 2, side = 50 / 2
        assert_eq!(training.y().bboxes[0], BoundingBox::new(37, 37, 62, 62));
        // spot (300, 200)
        assert_eq!(training.y().bboxes[1], BoundingBox::new(137, 87, 162, 112));
        assert_eq!(dataset.files[1].y().bboxes[0], BoundingBox::new(87, 62, 112, 87));

        // boxes and pixels agree: the box around spot (100, 100) lies in the
        // level-1 patch read from the same level
        let inside = training.boxes_in_patch(30, 30);
        assert_eq!(inside.bboxes, vec![BoundingBox::new(7, 7, 32, 32)]);
        let patch = training.get_patch(30, 30).unwrap();
        assert_eq!(patch.dimensions(), (64, 64));
    }

    #[tokio::test]
    async fn test_every_slide_lands_in_exactly_one_split() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mut options) = fixture(dir.path()).await;
        options.test_slide_ids = HashSet::from([1, 3, 99]);

        let dataset = load_slides(&db, &PyramidOpener::default(), &options)
            .await
            .unwrap();

        assert!(dataset.training_slides.is_empty());
        assert_eq!(dataset.test_slides, vec![0, 1]);
        for index in 0..dataset.len() {
            let in_training = dataset.training_slides.contains(&index);
            let in_test = dataset.test_slides.contains(&index);
            assert!(in_training ^ in_test);
        }
    }

    #[tokio::test]
    async fn test_missing_slide_file() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mut options) = fixture(dir.path()).await;
        std::fs::remove_file(dir.path().join("a.png")).unwrap();

        assert!(
            load_slides(&db, &PyramidOpener::default(), &options)
                .await
                .is_err()
        );

        options.skip_missing = true;
        let dataset = load_slides(&db, &PyramidOpener::default(), &options)
            .await
            .unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.test_slides, vec![0]);
    }

    #[test]
    fn test_index_annotations_skips_incomplete_spots() {
        let spot = |uid, class, coordinates| AnnotationRecord {
            uid,
            slide: 1,
            annotation_type: AnnotationType::Spot,
            agreed_class: class,
            deleted: false,
            coordinates,
        };
        let records = vec![
            spot(1, Some(2), vec![(50, 50)]),
            spot(2, None, vec![(60, 60)]),
            spot(3, Some(2), vec![]),
            spot(4, Some(5), vec![(70, 70)]),
        ];

        let (annotations, labelled) = index_annotations(&records, 2, 25.0, 2.0);

        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled.bboxes[0], BoundingBox::new(12, 12, 37, 37));
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[&5].label, vec![5]);
    }

    #[test]
    fn test_split_parsing() {
        assert_eq!("training".parse::<Split>().unwrap(), Split::Training);
        assert_eq!("Train".parse::<Split>().unwrap(), Split::Training);
        assert_eq!("test".parse::<Split>().unwrap(), Split::Test);
        assert!("validation".parse::<Split>().is_err());
        assert_eq!(Split::Test.to_string(), "test");
    }
}
