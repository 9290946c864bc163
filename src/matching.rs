//! Per-image matching of detections to ground truth.
//!
//! For one (image, category) pair the detections are sorted by score and
//! capped, the similarity matrix is computed once, and then every size range
//! reuses it to run greedy matching at every threshold.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::params::{AreaRange, Params, SimilarityKind};
use crate::similarity::{Similarity, SimilarityMatrix};
use crate::types::Annotation;

/// Thresholds are clamped below one so a perfect overlap still matches at 1.0.
const MAX_THRESHOLD: f64 = 1.0 - 1e-10;

/// Matching outcome for one (image, category, size range).
///
/// Match grids hold annotation ids with `0` meaning "unmatched", so
/// annotation ids must be non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub image_id: u64,
    /// `None` when categories are pooled.
    pub category_id: Option<u64>,
    pub area_index: usize,
    pub area_range: [f64; 2],
    pub max_detections: usize,
    /// Detection ids, sorted by score descending and capped.
    pub dt_ids: Vec<u64>,
    /// Ground-truth ids, non-ignored first.
    pub gt_ids: Vec<u64>,
    /// `dt_matches[t][d]`: matched ground-truth id or 0.
    pub dt_matches: Vec<Vec<u64>>,
    /// `gt_matches[t][g]`: matched detection id or 0.
    pub gt_matches: Vec<Vec<u64>>,
    pub dt_scores: Vec<f64>,
    pub gt_ignore: Vec<bool>,
    /// `dt_ignore[t][d]`
    pub dt_ignore: Vec<Vec<bool>>,
}

impl MatchRecord {
    /// Ground truths that count towards recall.
    pub fn num_positives(&self) -> usize {
        self.gt_ignore.iter().filter(|&&ignored| !ignored).count()
    }

    /// Whether grid shapes agree and the two match grids point at each other.
    ///
    /// A crowd region keeps only its last matched detection in `gt_matches`,
    /// so a detection-side match only requires its ground truth to be taken.
    pub fn is_consistent(&self) -> bool {
        let nd = self.dt_ids.len();
        let ng = self.gt_ids.len();
        let shapes_ok = self.dt_scores.len() == nd
            && self.gt_ignore.len() == ng
            && self.dt_matches.len() == self.dt_ignore.len()
            && self.dt_matches.len() == self.gt_matches.len()
            && self.dt_matches.iter().all(|row| row.len() == nd)
            && self.dt_ignore.iter().all(|row| row.len() == nd)
            && self.gt_matches.iter().all(|row| row.len() == ng);
        if !shapes_ok {
            return false;
        }

        self.dt_matches
            .iter()
            .zip(&self.gt_matches)
            .all(|(dt_row, gt_row)| {
                let dt_side = dt_row.iter().all(|&gt_id| {
                    gt_id == 0
                        || self
                            .gt_ids
                            .iter()
                            .zip(gt_row)
                            .any(|(&g, &matched)| g == gt_id && matched != 0)
                });
                let gt_side = gt_row.iter().zip(&self.gt_ids).all(|(&dt_id, &gt_id)| {
                    dt_id == 0
                        || self
                            .dt_ids
                            .iter()
                            .zip(dt_row)
                            .any(|(&d, &matched)| d == dt_id && matched == gt_id)
                });
                dt_side && gt_side
            })
    }
}

/// Greedy search state for one detection at one threshold.
///
/// Ground truths are visited non-ignored first. Once the best candidate is a
/// non-ignored ground truth the scan is locked: reaching the ignored tail
/// ends it, so an ignored region never steals a real match.
#[derive(Debug, Clone, Copy)]
struct GreedyScan {
    best_similarity: f64,
    best: Option<usize>,
    locked: bool,
}

impl GreedyScan {
    fn new(threshold: f64) -> Self {
        Self {
            best_similarity: threshold.min(MAX_THRESHOLD),
            best: None,
            locked: false,
        }
    }

    /// Offer ground truth `index` to the scan.
    fn visit(
        &mut self,
        index: usize,
        similarity: f64,
        ignored: bool,
        available: bool,
    ) -> ControlFlow<()> {
        if !available {
            return ControlFlow::Continue(());
        }
        if self.locked && ignored {
            return ControlFlow::Break(());
        }
        if similarity < self.best_similarity {
            return ControlFlow::Continue(());
        }
        self.best_similarity = similarity;
        self.best = Some(index);
        self.locked = !ignored;
        ControlFlow::Continue(())
    }
}

/// Shape required by `params.kind`: a 4-value box, or keypoints matching the
/// sigma table. Keypoint ground truths also need the box OKS falls back to.
fn check_shape(ann: &Annotation, is_gt: bool, params: &Params) -> Result<()> {
    if params.kind == SimilarityKind::Bbox || is_gt {
        ann.to_bbox()?;
    }
    if params.kind == SimilarityKind::Keypoints {
        let expected = 3 * params.keypoint_sigmas.len();
        let found = ann.keypoints.as_ref().map_or(0, Vec::len);
        if found != expected {
            return Err(EvalError::InvalidAnnotation(format!(
                "annotation {} has {} keypoint values, expected {}",
                ann.id, found, expected
            )));
        }
    }
    Ok(())
}

/// Detections and ground truths of one (image, category) pair, ready to be
/// matched for any size range.
pub struct ImageMatcher<'a> {
    image_id: u64,
    category_id: Option<u64>,
    kind: SimilarityKind,
    max_detections: usize,
    ground_truths: Vec<&'a Annotation>,
    detections: Vec<&'a Annotation>,
    /// Rows follow `detections`, columns follow `ground_truths`.
    similarity: SimilarityMatrix,
}

impl<'a> ImageMatcher<'a> {
    /// Sort and cap the detections and compute their similarity to the
    /// ground truths.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Precondition`] when an annotation has id 0, a
    /// non-finite score or the wrong shape for `params.kind`, when the
    /// provider fails, or when the provider's matrix does not match the
    /// inputs.
    pub fn new(
        image_id: u64,
        category_id: Option<u64>,
        ground_truths: Vec<&'a Annotation>,
        mut detections: Vec<&'a Annotation>,
        params: &Params,
        similarity: &dyn Similarity,
    ) -> Result<Self> {
        let fail = |message: String| EvalError::precondition(image_id, category_id, message);

        if let Some(ann) = ground_truths.iter().chain(&detections).find(|a| a.id == 0) {
            return Err(fail(format!(
                "annotation id 0 on image {} is reserved for unmatched entries",
                ann.image_id
            )));
        }
        if let Some(ann) = detections.iter().find(|a| !a.confidence().is_finite()) {
            return Err(fail(format!("detection {} has a non-finite score", ann.id)));
        }
        // Checked up front: the provider never sees an image with one side empty.
        for (ann, is_gt) in ground_truths
            .iter()
            .map(|a| (*a, true))
            .chain(detections.iter().map(|a| (*a, false)))
        {
            check_shape(ann, is_gt, params).map_err(|e| fail(e.to_string()))?;
        }

        // Stable: equal scores keep input order.
        detections.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        let max_detections = params.max_detection_cap();
        detections.truncate(max_detections);

        let matrix = if ground_truths.is_empty() || detections.is_empty() {
            vec![Vec::new(); detections.len()]
        } else {
            let matrix = similarity
                .compute(&detections, &ground_truths)
                .map_err(|e| fail(e.to_string()))?;
            if matrix.len() != detections.len()
                || matrix.iter().any(|row| row.len() != ground_truths.len())
            {
                return Err(fail(format!(
                    "similarity matrix does not match {} detections x {} ground truths",
                    detections.len(),
                    ground_truths.len()
                )));
            }
            matrix
        };

        Ok(Self {
            image_id,
            category_id,
            kind: params.kind,
            max_detections,
            ground_truths,
            detections,
            similarity: matrix,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ground_truths.is_empty() && self.detections.is_empty()
    }

    /// Whether a ground truth is left out of recall for this size range.
    fn ignores(&self, gt: &Annotation, range: &AreaRange) -> bool {
        let mut ignored = gt.is_crowd() || gt.is_marked_ignore() || !range.contains(gt.area());
        if self.kind == SimilarityKind::Keypoints {
            ignored |= gt.visible_keypoints() == 0;
        }
        ignored
    }

    /// Greedy matching at every threshold for the size range at `area_index`.
    ///
    /// Returns `None` when the image has neither ground truths nor detections.
    pub fn match_range(&self, area_index: usize, params: &Params) -> Option<MatchRecord> {
        if self.is_empty() {
            return None;
        }
        let range = &params.area_ranges[area_index];

        let raw_ignore: Vec<bool> = self
            .ground_truths
            .iter()
            .map(|gt| self.ignores(gt, range))
            .collect();
        let mut gt_order: Vec<usize> = (0..self.ground_truths.len()).collect();
        gt_order.sort_by_key(|&g| raw_ignore[g]);

        let gt_ids: Vec<u64> = gt_order.iter().map(|&g| self.ground_truths[g].id).collect();
        let gt_ignore: Vec<bool> = gt_order.iter().map(|&g| raw_ignore[g]).collect();
        let gt_crowd: Vec<bool> = gt_order
            .iter()
            .map(|&g| self.ground_truths[g].is_crowd())
            .collect();
        let dt_out_of_range: Vec<bool> = self
            .detections
            .iter()
            .map(|dt| !range.contains(dt.area()))
            .collect();

        let nt = params.iou_thresholds.len();
        let nd = self.detections.len();
        let ng = gt_ids.len();
        let mut dt_matches = vec![vec![0u64; nd]; nt];
        let mut gt_matches = vec![vec![0u64; ng]; nt];
        let mut dt_ignore = vec![vec![false; nd]; nt];

        for (t, &threshold) in params.iou_thresholds.iter().enumerate() {
            let mut taken = vec![false; ng];
            for (d, dt) in self.detections.iter().enumerate() {
                let mut scan = GreedyScan::new(threshold);
                for (g, &original) in gt_order.iter().enumerate() {
                    let available = !taken[g] || gt_crowd[g];
                    let similarity = self.similarity[d][original];
                    if scan.visit(g, similarity, gt_ignore[g], available).is_break() {
                        break;
                    }
                }

                match scan.best {
                    Some(g) => {
                        taken[g] = true;
                        dt_matches[t][d] = gt_ids[g];
                        gt_matches[t][g] = dt.id;
                        dt_ignore[t][d] = gt_ignore[g];
                    }
                    None => dt_ignore[t][d] = dt_out_of_range[d],
                }
            }
        }

        Some(MatchRecord {
            image_id: self.image_id,
            category_id: self.category_id,
            area_index,
            area_range: [range.min, range.max],
            max_detections: self.max_detections,
            dt_ids: self.detections.iter().map(|dt| dt.id).collect(),
            gt_ids,
            dt_matches,
            gt_matches,
            dt_scores: self.detections.iter().map(|dt| dt.confidence()).collect(),
            gt_ignore,
            dt_ignore,
        })
    }
}

/// Match one (image, category) pair for a single size range.
///
/// Convenience wrapper over [`ImageMatcher`]; the evaluator builds the
/// matcher once and reuses it across size ranges instead.
pub fn evaluate_image(
    image_id: u64,
    category_id: Option<u64>,
    ground_truths: &[&Annotation],
    detections: &[&Annotation],
    area_index: usize,
    params: &Params,
    similarity: &dyn Similarity,
) -> Result<Option<MatchRecord>> {
    let matcher = ImageMatcher::new(
        image_id,
        category_id,
        ground_truths.to_vec(),
        detections.to_vec(),
        params,
        similarity,
    )?;
    Ok(matcher.match_range(area_index, params))
}
