//! Object Keypoint Similarity (OKS).

use super::{Similarity, SimilarityMatrix};
use crate::error::{EvalError, Result};
use crate::types::Annotation;

/// Keypoint similarity with a per-keypoint falloff table.
///
/// For each ground truth with scale `area`, keypoint `i` contributes
/// `exp(-d² / (2 · area · (2σᵢ)²))`. With labeled ground-truth keypoints only
/// those are averaged and `d` is the plain offset. Without any, every
/// keypoint is averaged and `d` is the distance outside the ground-truth box
/// grown by its own size on each side.
#[derive(Debug, Clone)]
pub struct KeypointOks {
    sigmas: Vec<f64>,
    variances: Vec<f64>,
}

impl KeypointOks {
    pub fn new(sigmas: Vec<f64>) -> Self {
        let variances = sigmas.iter().map(|s| (2.0 * s).powi(2)).collect();
        Self { sigmas, variances }
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    fn keypoints<'a>(&self, ann: &'a Annotation) -> Result<&'a [f64]> {
        let kps = ann.keypoints.as_deref().ok_or_else(|| {
            EvalError::InvalidAnnotation(format!("Annotation {} has no keypoints", ann.id))
        })?;
        if kps.len() != 3 * self.sigmas.len() {
            return Err(EvalError::InvalidAnnotation(format!(
                "Annotation {} has {} keypoint values, expected {}",
                ann.id,
                kps.len(),
                3 * self.sigmas.len()
            )));
        }
        Ok(kps)
    }

    fn similarity(&self, dt: &[f64], gt: &[f64], gt_box: [f64; 4], area: f64) -> f64 {
        let labeled = gt.chunks_exact(3).filter(|kp| kp[2] > 0.0).count();
        let [x, y, w, h] = gt_box;
        let (x0, x1) = (x - w, x + 2.0 * w);
        let (y0, y1) = (y - h, y + 2.0 * h);
        let scale = area + f64::EPSILON;

        let mut total = 0.0;
        let mut count = 0usize;
        for ((g, d), var) in gt.chunks_exact(3).zip(dt.chunks_exact(3)).zip(&self.variances) {
            let (dx, dy) = if labeled > 0 {
                if g[2] <= 0.0 {
                    continue;
                }
                (d[0] - g[0], d[1] - g[1])
            } else {
                (
                    0f64.max(x0 - d[0]) + 0f64.max(d[0] - x1),
                    0f64.max(y0 - d[1]) + 0f64.max(d[1] - y1),
                )
            };
            let e = (dx * dx + dy * dy) / var / scale / 2.0;
            total += (-e).exp();
            count += 1;
        }

        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}

impl Default for KeypointOks {
    fn default() -> Self {
        Self::new(crate::params::COCO_KEYPOINT_SIGMAS.to_vec())
    }
}

impl Similarity for KeypointOks {
    fn compute(
        &self,
        detections: &[&Annotation],
        ground_truths: &[&Annotation],
    ) -> Result<SimilarityMatrix> {
        let dt_kps = detections
            .iter()
            .map(|ann| self.keypoints(ann))
            .collect::<Result<Vec<_>>>()?;

        let mut matrix = vec![vec![0.0; ground_truths.len()]; detections.len()];
        for (j, gt) in ground_truths.iter().enumerate() {
            let gt_kps = self.keypoints(gt)?;
            let gt_box = gt.to_bbox()?;
            let gt_box = [gt_box.x, gt_box.y, gt_box.width, gt_box.height];
            for (i, dt) in dt_kps.iter().enumerate() {
                matrix[i][j] = self.similarity(dt, gt_kps, gt_box, gt.area());
            }
        }

        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: u64, keypoints: Vec<f64>) -> Annotation {
        Annotation::new(id, 1, 1, vec![0.0, 0.0, 100.0, 100.0]).with_keypoints(keypoints)
    }

    fn skeleton(offset: f64, visibility: f64) -> Vec<f64> {
        (0..17)
            .flat_map(|i| [10.0 + i as f64 * 4.0 + offset, 20.0 + i as f64 * 3.0, visibility])
            .collect()
    }

    #[test]
    fn test_identical_keypoints() {
        let gt = person(1, skeleton(0.0, 2.0));
        let dt = person(2, skeleton(0.0, 1.0));
        let m = KeypointOks::default().compute(&[&dt], &[&gt]).unwrap();
        assert!((m[0][0] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_offset_reduces_similarity() {
        let gt = person(1, skeleton(0.0, 2.0));
        let near = person(2, skeleton(1.0, 1.0));
        let far = person(3, skeleton(10.0, 1.0));
        let m = KeypointOks::default().compute(&[&near, &far], &[&gt]).unwrap();
        assert!(m[0][0] < 1.0);
        assert!(m[1][0] < m[0][0]);
    }

    #[test]
    fn test_only_labeled_keypoints_count() {
        let mut gt_kps = skeleton(0.0, 2.0);
        // Unlabel the first keypoint and move the detection's copy far away.
        gt_kps[2] = 0.0;
        let mut dt_kps = skeleton(0.0, 1.0);
        dt_kps[0] += 500.0;
        let m = KeypointOks::default()
            .compute(&[&person(2, dt_kps)], &[&person(1, gt_kps)])
            .unwrap();
        assert!((m[0][0] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_unlabeled_ground_truth_uses_expanded_box() {
        let gt = person(1, vec![0.0; 51]);
        // Inside [-100, 200] on both axes: zero distance.
        let inside = person(2, skeleton(0.0, 1.0));
        let outside = person(3, skeleton(400.0, 1.0));
        let m = KeypointOks::default().compute(&[&inside, &outside], &[&gt]).unwrap();
        assert!((m[0][0] - 1.0).abs() < 1e-10);
        assert!(m[1][0] < 1e-3);
    }

    #[test]
    fn test_wrong_keypoint_count() {
        let gt = person(1, vec![1.0, 1.0, 2.0]);
        let dt = person(2, skeleton(0.0, 1.0));
        assert!(KeypointOks::default().compute(&[&dt], &[&gt]).is_err());
    }
}
