//! JSON loading utilities for COCO format datasets and detection results.

use crate::error::{EvalError, Result};
use crate::types::{Annotation, BoundingBox, CocoDataset};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load a COCO dataset from a JSON file.
///
/// # Arguments
///
/// * `path` - Path to the COCO JSON file
///
/// # Returns
///
/// Returns a `CocoDataset` containing images, annotations, and categories.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
///
/// ```no_run
/// use coco_eval_engine::loader::load_from_file;
///
/// let dataset = load_from_file("annotations.json").unwrap();
/// println!("Loaded {} annotations", dataset.annotations.len());
/// ```
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<CocoDataset> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let dataset: CocoDataset = serde_json::from_reader(reader)?;

    validate_dataset(&dataset)?;

    Ok(dataset)
}

/// Load a COCO dataset from a JSON string.
///
/// # Example
///
/// ```
/// use coco_eval_engine::loader::load_from_string;
///
/// let json = r#"{
///     "annotations": [],
///     "categories": [{"id": 1, "name": "person"}]
/// }"#;
/// let dataset = load_from_string(json).unwrap();
/// assert_eq!(dataset.categories.len(), 1);
/// ```
pub fn load_from_string(json_str: &str) -> Result<CocoDataset> {
    let dataset: CocoDataset = serde_json::from_str(json_str)?;
    validate_dataset(&dataset)?;
    Ok(dataset)
}

/// One entry of a detection results file.
#[derive(Debug, Clone, Deserialize)]
struct DetectionRecord {
    image_id: u64,
    category_id: u64,
    #[serde(default)]
    bbox: Vec<f64>,
    #[serde(default)]
    keypoints: Option<Vec<f64>>,
    score: f64,
}

/// Load detection results (a JSON array) from a file.
///
/// See [`load_detections_from_str`].
pub fn load_detections_from_file<P: AsRef<Path>>(
    path: P,
    ground_truth: &CocoDataset,
) -> Result<CocoDataset> {
    let file = File::open(path)?;
    let records: Vec<DetectionRecord> = serde_json::from_reader(BufReader::new(file))?;
    build_detections(records, ground_truth)
}

/// Load detection results from a JSON array string.
///
/// Each result needs `image_id`, `category_id`, `score` and a `bbox` or
/// `keypoints` shape. Ids are assigned `1..=N` in file order, areas are
/// derived from the shape, and the images and categories are shared with the
/// ground truth.
///
/// # Errors
///
/// Fails when a result names an image the ground truth does not contain, or
/// carries no usable shape.
///
/// # Example
///
/// ```
/// use coco_eval_engine::loader::{load_detections_from_str, load_from_string};
///
/// let gt = load_from_string(r#"{
///     "images": [{"id": 1, "file_name": "a.jpg", "height": 10, "width": 10}],
///     "annotations": [],
///     "categories": [{"id": 1, "name": "person"}]
/// }"#).unwrap();
/// let dt = load_detections_from_str(
///     r#"[{"image_id": 1, "category_id": 1, "bbox": [0, 0, 2, 3], "score": 0.5}]"#,
///     &gt,
/// ).unwrap();
/// assert_eq!(dt.annotations[0].id, 1);
/// assert_eq!(dt.annotations[0].area, Some(6.0));
/// ```
pub fn load_detections_from_str(json_str: &str, ground_truth: &CocoDataset) -> Result<CocoDataset> {
    let records: Vec<DetectionRecord> = serde_json::from_str(json_str)?;
    build_detections(records, ground_truth)
}

fn build_detections(
    records: Vec<DetectionRecord>,
    ground_truth: &CocoDataset,
) -> Result<CocoDataset> {
    let known_images: Option<HashSet<u64>> = ground_truth
        .images
        .as_ref()
        .map(|imgs| imgs.iter().map(|img| img.id).collect());

    let mut annotations = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let id = i as u64 + 1;

        if let Some(known) = &known_images {
            if !known.contains(&record.image_id) {
                return Err(EvalError::InvalidAnnotation(format!(
                    "Result {} refers to image {} which is not in the ground truth",
                    id, record.image_id
                )));
            }
        }

        // Keypoint results take their box from the keypoint extent.
        let annotation = match (record.keypoints, record.bbox.len()) {
            (Some(keypoints), _) => {
                let bbox = BoundingBox::enclosing_keypoints(&keypoints).ok_or_else(|| {
                    EvalError::InvalidAnnotation(format!(
                        "Result {} has an empty keypoint list",
                        id
                    ))
                })?;
                let mut ann =
                    Annotation::new(id, record.image_id, record.category_id, bbox.to_vec());
                ann.keypoints = Some(keypoints);
                ann
            }
            (None, 4) => Annotation::new(id, record.image_id, record.category_id, record.bbox),
            (None, n) => {
                return Err(EvalError::InvalidBoundingBox(format!(
                    "Result {} has {} bbox values and no keypoints",
                    id, n
                )))
            }
        };

        annotations.push(Annotation {
            iscrowd: Some(0),
            score: Some(record.score),
            ..annotation
        });
    }

    let dataset = CocoDataset {
        images: ground_truth.images.clone(),
        annotations,
        categories: ground_truth.categories.clone(),
    };
    validate_dataset(&dataset)?;
    Ok(dataset)
}

/// Validate that a COCO dataset has the required structure.
fn validate_dataset(dataset: &CocoDataset) -> Result<()> {
    if dataset.categories.is_empty() {
        return Err(EvalError::EmptyDataset(
            "Dataset must contain at least one category".to_string(),
        ));
    }

    for annotation in &dataset.annotations {
        // Keypoint-only annotations may omit the box.
        if !annotation.bbox.is_empty() {
            if annotation.bbox.len() != 4 {
                return Err(EvalError::InvalidAnnotation(format!(
                    "Annotation {} has invalid bbox length: {}",
                    annotation.id,
                    annotation.bbox.len()
                )));
            }

            if annotation.bbox[2] < 0.0 || annotation.bbox[3] < 0.0 {
                return Err(EvalError::InvalidBoundingBox(format!(
                    "Annotation {} has negative dimensions",
                    annotation.id
                )));
            }
        }

        if let Some(keypoints) = &annotation.keypoints {
            if keypoints.len() % 3 != 0 {
                return Err(EvalError::InvalidAnnotation(format!(
                    "Annotation {} has {} keypoint values, not a multiple of 3",
                    annotation.id,
                    keypoints.len()
                )));
            }
        }
    }

    Ok(())
}
