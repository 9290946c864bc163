//! Core data types for COCO annotations.

use serde::{Deserialize, Serialize};

/// Represents a bounding box in COCO format (x, y, width, height).
///
/// Coordinates are in LTWH (Left-Top-Width-Height) format where:
/// - x: Left coordinate
/// - y: Top coordinate
/// - width: Box width
/// - height: Box height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Get the area of the bounding box.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Get the right coordinate (x + width).
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Get the bottom coordinate (y + height).
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Check if the bounding box is valid (positive dimensions).
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Tightest box around a flat `[x, y, v, ...]` keypoint array.
    ///
    /// Every keypoint counts, visible or not, so unlabeled `(0, 0)` entries
    /// pull the box towards the origin.
    pub fn enclosing_keypoints(keypoints: &[f64]) -> Option<Self> {
        let mut points = keypoints.chunks_exact(3);
        let first = points.next()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first[0], first[1], first[0], first[1]);
        for kp in points {
            x0 = x0.min(kp[0]);
            x1 = x1.max(kp[0]);
            y0 = y0.min(kp[1]);
            y1 = y1.max(kp[1]);
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Flat `[x, y, w, h]` form used by the JSON format.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.x, self.y, self.width, self.height]
    }
}

/// Represents a category in the COCO dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supercategory: Option<String>,
}

/// Represents an image in the COCO dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    #[serde(default)]
    pub file_name: String,
    pub height: u32,
    pub width: u32,
}

/// Represents an annotation in COCO format.
///
/// The same record describes ground truths and detections; detections carry
/// a `score`, ground truths may carry `iscrowd` and `ignore`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// Bounding box in [x, y, width, height] format
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bbox: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iscrowd: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<u8>,
    /// Keypoints as a flat [x1, y1, v1, x2, y2, v2, ...] array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_keypoints: Option<u32>,
    /// Confidence score (for predictions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Annotation {
    /// Create a box annotation with its area set to the box area.
    pub fn new(id: u64, image_id: u64, category_id: u64, bbox: Vec<f64>) -> Self {
        let area = (bbox.len() == 4).then(|| bbox[2] * bbox[3]);
        Self {
            id,
            image_id,
            category_id,
            bbox,
            area,
            ..Self::default()
        }
    }

    /// Set the confidence score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Override the area.
    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }

    /// Mark the annotation as a crowd region.
    pub fn crowd(mut self) -> Self {
        self.iscrowd = Some(1);
        self
    }

    /// Attach keypoints and derive `num_keypoints` from their visibility flags.
    pub fn with_keypoints(mut self, keypoints: Vec<f64>) -> Self {
        let visible = keypoints.chunks_exact(3).filter(|kp| kp[2] > 0.0).count();
        self.num_keypoints = Some(visible as u32);
        self.keypoints = Some(keypoints);
        self
    }

    /// Convert the bbox array to a BoundingBox struct.
    pub fn to_bbox(&self) -> crate::error::Result<BoundingBox> {
        if self.bbox.len() != 4 {
            return Err(crate::error::EvalError::InvalidBoundingBox(format!(
                "Expected 4 values, got {}",
                self.bbox.len()
            )));
        }
        Ok(BoundingBox::new(
            self.bbox[0],
            self.bbox[1],
            self.bbox[2],
            self.bbox[3],
        ))
    }

    /// Get the confidence score, defaulting to 1.0 if not present.
    pub fn confidence(&self) -> f64 {
        self.score.unwrap_or(1.0)
    }

    /// Area used for size-range filtering. Falls back to the box area.
    pub fn area(&self) -> f64 {
        match self.area {
            Some(area) => area,
            None if self.bbox.len() == 4 => self.bbox[2] * self.bbox[3],
            None => 0.0,
        }
    }

    pub fn is_crowd(&self) -> bool {
        self.iscrowd.unwrap_or(0) != 0
    }

    /// Explicit `ignore` flag from the annotation file.
    pub fn is_marked_ignore(&self) -> bool {
        self.ignore.unwrap_or(0) != 0
    }

    /// Number of labeled keypoints.
    ///
    /// Uses `num_keypoints` when present and counts `v > 0` otherwise.
    pub fn visible_keypoints(&self) -> usize {
        match (self.num_keypoints, &self.keypoints) {
            (Some(n), _) => n as usize,
            (None, Some(kps)) => kps.chunks_exact(3).filter(|kp| kp[2] > 0.0).count(),
            (None, None) => 0,
        }
    }
}

/// Represents a complete COCO dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<Image>>,
    pub annotations: Vec<Annotation>,
    pub categories: Vec<Category>,
}
