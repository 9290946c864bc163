//! Intersection over Union (IoU) calculation.

use super::{Similarity, SimilarityMatrix};
use crate::error::Result;
use crate::types::{Annotation, BoundingBox};

/// Area shared by two boxes, zero when they do not overlap.
fn intersection_area(bbox1: &BoundingBox, bbox2: &BoundingBox) -> f64 {
    let x_left = bbox1.x.max(bbox2.x);
    let y_top = bbox1.y.max(bbox2.y);
    let x_right = bbox1.right().min(bbox2.right());
    let y_bottom = bbox1.bottom().min(bbox2.bottom());

    if x_right < x_left || y_bottom < y_top {
        return 0.0;
    }

    (x_right - x_left) * (y_bottom - y_top)
}

/// Calculate the Intersection over Union (IoU) between two bounding boxes.
///
/// IoU is defined as the area of intersection divided by the area of union.
///
/// # Example
///
/// ```
/// use coco_eval_engine::similarity::calculate_iou;
/// use coco_eval_engine::types::BoundingBox;
///
/// let bbox1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
/// let bbox2 = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
/// let iou = calculate_iou(&bbox1, &bbox2);
/// assert!(iou > 0.0 && iou < 1.0);
/// ```
pub fn calculate_iou(bbox1: &BoundingBox, bbox2: &BoundingBox) -> f64 {
    let intersection = intersection_area(bbox1, bbox2);
    let union_area = bbox1.area() + bbox2.area() - intersection;

    // Avoid division by zero
    if union_area == 0.0 {
        return 0.0;
    }

    intersection / union_area
}

/// Overlap of a detection with a crowd region.
///
/// A crowd region covers many objects, so the detection is scored by the
/// fraction of its own area inside the region rather than by the union.
pub fn calculate_crowd_iou(detection: &BoundingBox, crowd: &BoundingBox) -> f64 {
    let area = detection.area();
    if area == 0.0 {
        return 0.0;
    }
    intersection_area(detection, crowd) / area
}

/// Calculate IoU matrix between detections and ground-truth boxes.
///
/// `result[i][j]` is the overlap of `detections[i]` with `ground_truths[j]`,
/// using [`calculate_crowd_iou`] for columns flagged in `iscrowd`.
///
/// # Example
///
/// ```
/// use coco_eval_engine::similarity::calculate_iou_matrix;
/// use coco_eval_engine::types::BoundingBox;
///
/// let dts = vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0)];
/// let gts = vec![BoundingBox::new(5.0, 5.0, 10.0, 10.0)];
/// let iou_matrix = calculate_iou_matrix(&dts, &gts, &[false]);
/// assert_eq!(iou_matrix.len(), 1);
/// assert_eq!(iou_matrix[0].len(), 1);
/// ```
pub fn calculate_iou_matrix(
    detections: &[BoundingBox],
    ground_truths: &[BoundingBox],
    iscrowd: &[bool],
) -> SimilarityMatrix {
    detections
        .iter()
        .map(|dt| {
            ground_truths
                .iter()
                .zip(iscrowd)
                .map(|(gt, &crowd)| {
                    if crowd {
                        calculate_crowd_iou(dt, gt)
                    } else {
                        calculate_iou(dt, gt)
                    }
                })
                .collect()
        })
        .collect()
}

/// Box-overlap similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxIou;

impl Similarity for BoxIou {
    fn compute(
        &self,
        detections: &[&Annotation],
        ground_truths: &[&Annotation],
    ) -> Result<SimilarityMatrix> {
        let dt_boxes = detections
            .iter()
            .map(|ann| ann.to_bbox())
            .collect::<Result<Vec<_>>>()?;
        let gt_boxes = ground_truths
            .iter()
            .map(|ann| ann.to_bbox())
            .collect::<Result<Vec<_>>>()?;
        let iscrowd: Vec<bool> = ground_truths.iter().map(|ann| ann.is_crowd()).collect();

        Ok(calculate_iou_matrix(&dt_boxes, &gt_boxes, &iscrowd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_boxes() {
        let bbox1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let bbox2 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let iou = calculate_iou(&bbox1, &bbox2);
        assert!((iou - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_no_overlap() {
        let bbox1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let bbox2 = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        let iou = calculate_iou(&bbox1, &bbox2);
        assert_eq!(iou, 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let bbox1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let bbox2 = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        let iou = calculate_iou(&bbox1, &bbox2);

        // Intersection: 5x5 = 25
        // Union: 100 + 100 - 25 = 175
        assert!((iou - 25.0 / 175.0).abs() < 1e-10);
    }

    #[test]
    fn test_crowd_overlap_uses_detection_area() {
        let detection = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let crowd = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((calculate_crowd_iou(&detection, &crowd) - 1.0).abs() < 1e-10);
        assert!(calculate_iou(&detection, &crowd) < 0.02);
    }

    #[test]
    fn test_iou_matrix() {
        let dts = vec![
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            BoundingBox::new(5.0, 5.0, 10.0, 10.0),
        ];
        let gts = vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0)];

        let matrix = calculate_iou_matrix(&dts, &gts, &[false]);
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].len(), 1);
        assert!((matrix[0][0] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_box_iou_rejects_missing_box() {
        let dt = Annotation::new(1, 1, 1, vec![0.0, 0.0, 1.0]);
        let gt = Annotation::new(2, 1, 1, vec![0.0, 0.0, 1.0, 1.0]);
        assert!(BoxIou.compute(&[&dt], &[&gt]).is_err());
    }
}
