//! Evaluation parameters.
//!
//! A [`Params`] value is plain configuration. The evaluator snapshots it at
//! the start of a pass, so a pass never observes later edits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// Per-keypoint OKS constants for the 17-point COCO person skeleton.
pub const COCO_KEYPOINT_SIGMAS: [f64; 17] = [
    0.026, 0.025, 0.025, 0.035, 0.035, 0.079, 0.079, 0.072, 0.072, 0.062, 0.062, 0.107, 0.107,
    0.087, 0.087, 0.089, 0.089,
];

/// Upper bound used by the open-ended size ranges.
pub const MAX_AREA: f64 = 1e10;

/// Which similarity drives matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityKind {
    /// Box overlap (IoU, crowd-aware).
    Bbox,
    /// Object keypoint similarity.
    Keypoints,
}

impl SimilarityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityKind::Bbox => "bbox",
            SimilarityKind::Keypoints => "keypoints",
        }
    }
}

impl fmt::Display for SimilarityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bbox" => Ok(SimilarityKind::Bbox),
            "keypoints" => Ok(SimilarityKind::Keypoints),
            other => Err(EvalError::Configuration(format!(
                "Unknown similarity kind '{}', expected 'bbox' or 'keypoints'",
                other
            ))),
        }
    }
}

/// A named object-size bucket, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRange {
    pub label: String,
    pub min: f64,
    pub max: f64,
}

impl AreaRange {
    pub fn new(label: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            label: label.into(),
            min,
            max,
        }
    }

    /// Whether `area` falls inside the range.
    pub fn contains(&self, area: f64) -> bool {
        area >= self.min && area <= self.max
    }
}

/// Evaluation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub kind: SimilarityKind,
    /// Images to evaluate; empty means every ground-truth image.
    #[serde(default)]
    pub image_ids: Vec<u64>,
    /// Categories to evaluate; empty means every ground-truth category.
    #[serde(default)]
    pub category_ids: Vec<u64>,
    pub iou_thresholds: Vec<f64>,
    pub recall_thresholds: Vec<f64>,
    pub area_ranges: Vec<AreaRange>,
    /// Detection caps per image, ascending.
    pub max_detections: Vec<usize>,
    pub use_categories: bool,
    #[serde(default = "default_sigmas")]
    pub keypoint_sigmas: Vec<f64>,
}

fn default_sigmas() -> Vec<f64> {
    COCO_KEYPOINT_SIGMAS.to_vec()
}

impl Params {
    /// Default COCO parameters for the given similarity kind.
    pub fn new(kind: SimilarityKind) -> Self {
        // Default COCO evaluation thresholds: 0.5:0.05:0.95
        let iou_thresholds = linspace(0.5, 0.95, 10);
        let recall_thresholds = linspace(0.0, 1.0, 101);

        let (area_ranges, max_detections) = match kind {
            SimilarityKind::Bbox => (
                vec![
                    AreaRange::new("all", 0.0, MAX_AREA),
                    AreaRange::new("small", 0.0, 32f64.powi(2)),
                    AreaRange::new("medium", 32f64.powi(2), 96f64.powi(2)),
                    AreaRange::new("large", 96f64.powi(2), MAX_AREA),
                ],
                vec![1, 10, 100],
            ),
            SimilarityKind::Keypoints => (
                vec![
                    AreaRange::new("all", 0.0, MAX_AREA),
                    AreaRange::new("medium", 32f64.powi(2), 96f64.powi(2)),
                    AreaRange::new("large", 96f64.powi(2), MAX_AREA),
                ],
                vec![20],
            ),
        };

        Self {
            kind,
            image_ids: Vec::new(),
            category_ids: Vec::new(),
            iou_thresholds,
            recall_thresholds,
            area_ranges,
            max_detections,
            use_categories: true,
            keypoint_sigmas: default_sigmas(),
        }
    }

    /// Parse parameters from a JSON document and validate them.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Params = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn with_image_ids(mut self, image_ids: Vec<u64>) -> Self {
        self.image_ids = image_ids;
        self
    }

    pub fn with_category_ids(mut self, category_ids: Vec<u64>) -> Self {
        self.category_ids = category_ids;
        self
    }

    pub fn with_iou_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.iou_thresholds = thresholds;
        self
    }

    pub fn with_area_ranges(mut self, ranges: Vec<AreaRange>) -> Self {
        self.area_ranges = ranges;
        self
    }

    pub fn with_max_detections(mut self, caps: Vec<usize>) -> Self {
        self.max_detections = caps;
        self
    }

    pub fn with_use_categories(mut self, use_categories: bool) -> Self {
        self.use_categories = use_categories;
        self
    }

    /// The largest configured cap. Matching truncates once with this value.
    pub fn max_detection_cap(&self) -> usize {
        self.max_detections.iter().copied().max().unwrap_or(0)
    }

    /// Index of the size range with the given label.
    pub fn area_index(&self, label: &str) -> Option<usize> {
        self.area_ranges.iter().position(|r| r.label == label)
    }

    /// Index of the given detection cap.
    pub fn cap_index(&self, cap: usize) -> Option<usize> {
        self.max_detections.iter().position(|&m| m == cap)
    }

    /// Index of a threshold, compared with a small tolerance.
    pub fn threshold_index(&self, threshold: f64) -> Option<usize> {
        self.iou_thresholds
            .iter()
            .position(|&t| (t - threshold).abs() < 1e-9)
    }

    /// Check the parameters before any matching work starts.
    pub fn validate(&self) -> Result<()> {
        if self.iou_thresholds.is_empty() {
            return Err(config("at least one similarity threshold is required"));
        }
        if let Some(t) = self
            .iou_thresholds
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            return Err(config(format!(
                "similarity thresholds must lie in [0, 1], got {}",
                t
            )));
        }

        if self.recall_thresholds.is_empty() {
            return Err(config("the recall grid must not be empty"));
        }
        if self
            .recall_thresholds
            .iter()
            .any(|r| !(0.0..=1.0).contains(r))
        {
            return Err(config("recall grid points must lie in [0, 1]"));
        }
        if self.recall_thresholds.windows(2).any(|w| w[0] > w[1]) {
            return Err(config("the recall grid must be ascending"));
        }

        if self.area_ranges.is_empty() {
            return Err(config("at least one size range is required"));
        }
        for (i, range) in self.area_ranges.iter().enumerate() {
            if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                return Err(config(format!(
                    "size range '{}' has min {} above max {}",
                    range.label, range.min, range.max
                )));
            }
            if self.area_ranges[..i].iter().any(|r| r.label == range.label) {
                return Err(config(format!("duplicate size range label '{}'", range.label)));
            }
        }

        if self.max_detections.is_empty() || self.max_detections.contains(&0) {
            return Err(config("detection caps must be a non-empty list of positive counts"));
        }

        if self.kind == SimilarityKind::Keypoints && self.keypoint_sigmas.is_empty() {
            return Err(config("keypoint evaluation needs a sigma table"));
        }

        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new(SimilarityKind::Bbox)
    }
}

/// `num` evenly spaced points from `start` to `stop` inclusive, computed as
/// `start + i * step` with the last point pinned to `stop`.
///
/// Grid points such as `35 * 0.01 = 0.35000000000000003` differ from `35 / 100`
/// in the last bit, which decides ties in the recall lookup.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut points: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
            points[num - 1] = stop;
            points
        }
    }
}

fn config(message: impl Into<String>) -> EvalError {
    EvalError::Configuration(message.into())
}
