//! Writes sampled patches to disk with an object-detection manifest.
//!
//! The manifest is JSON lines in the Ground Truth object-detection layout
//! that Rekognition Custom Labels accepts: one line per image with a
//! `source-ref`, a `bounding-box` attribute and its metadata.

use anyhow::Result;
use chrono::Utc;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::{POSITIVE_LABEL, Split};
use crate::generator::PatchSample;
use crate::slide::SlideResult;

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub count: usize,
    pub split: Split,
    /// Prefix for `source-ref`, e.g. `s3://bucket/patches/training/`. When
    /// unset the local file path is used.
    pub source_prefix: Option<String>,
    /// Label -> class name.
    pub class_map: BTreeMap<u32, String>,
}

impl ExportOptions {
    pub fn new(count: usize, split: Split) -> Self {
        Self {
            count,
            split,
            source_prefix: None,
            class_map: BTreeMap::from([(POSITIVE_LABEL, "mitotic figure".to_string())]),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub split: Split,
    pub job_name: String,
    pub images: usize,
    pub positive_images: usize,
    pub boxes: usize,
    pub manifest: PathBuf,
}

fn manifest_line(
    source_ref: &str,
    sample: &PatchSample,
    class_map: &Value,
    job_name: &str,
    created: &str,
) -> Value {
    let annotations: Vec<Value> = sample
        .boxes
        .iter()
        .map(|(bbox, label)| {
            json!({
                "class_id": label,
                "left": bbox.left(),
                "top": bbox.top(),
                "width": bbox.width(),
                "height": bbox.height(),
            })
        })
        .collect();
    let objects: Vec<Value> = annotations
        .iter()
        .map(|_| json!({ "confidence": 1 }))
        .collect();

    json!({
        "source-ref": source_ref,
        "bounding-box": {
            "image_size": [{
                "width": sample.image.width(),
                "height": sample.image.height(),
                "depth": 3,
            }],
            "annotations": annotations,
        },
        "bounding-box-metadata": {
            "objects": objects,
            "class-map": class_map,
            "type": "groundtruth/object-detection",
            "human-annotated": "yes",
            "creation-date": created,
            "job-name": job_name,
        },
    })
}

/// Draw `options.count` samples and write them under `out_dir/<split>/`.
pub fn export_patches<I>(samples: I, out_dir: &Path, options: &ExportOptions) -> Result<ExportSummary>
where
    I: IntoIterator<Item = SlideResult<PatchSample>>,
{
    let split_dir = out_dir.join(options.split.to_string());
    fs::create_dir_all(&split_dir)?;

    let job_name = format!("wsi-sampler-{}", uuid::Uuid::new_v4());
    let created = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    let class_map: Value = options
        .class_map
        .iter()
        .map(|(label, name)| (label.to_string(), Value::String(name.clone())))
        .collect::<serde_json::Map<_, _>>()
        .into();

    let manifest_path = split_dir.join("manifest.jsonl");
    let mut manifest = BufWriter::new(fs::File::create(&manifest_path)?);

    let mut summary = ExportSummary {
        split: options.split,
        job_name: job_name.clone(),
        images: 0,
        positive_images: 0,
        boxes: 0,
        manifest: manifest_path.clone(),
    };

    for (index, sample) in samples.into_iter().take(options.count).enumerate() {
        let sample = sample?;

        let file_name = format!("{:06}.png", index);
        let path = split_dir.join(&file_name);
        fs::write(&path, encode_png(&sample.image)?)?;

        let source_ref = match &options.source_prefix {
            Some(prefix) => format!("{}{}", prefix, file_name),
            None => path.display().to_string(),
        };
        let line = manifest_line(&source_ref, &sample, &class_map, &job_name, &created);
        serde_json::to_writer(&mut manifest, &line)?;
        manifest.write_all(b"\n")?;

        summary.images += 1;
        summary.boxes += sample.boxes.len();
        if !sample.boxes.is_empty() {
            summary.positive_images += 1;
        }
    }

    manifest.flush()?;

    info!(
        "Exported {} {} patches ({} with boxes) to {}",
        summary.images,
        options.split,
        summary.positive_images,
        split_dir.display()
    );

    Ok(summary)
}
