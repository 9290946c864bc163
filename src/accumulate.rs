//! Cross-image accumulation of match records into precision/recall tensors.
//!
//! Every (category, size range, detection cap) triple is an independent work
//! item: it concatenates the per-image records of its group, ranks all
//! detections by score and derives the interpolated precision curve for each
//! threshold. Work items run in parallel and are written into the tensors
//! once all of them finish.

use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use crate::error::{EvalError, Result};
use crate::evaluator::Evaluation;
use crate::matching::MatchRecord;
use crate::params::Params;

/// Value stored for slices without any non-ignored ground truth.
pub const SENTINEL: f64 = -1.0;

/// Dimensions of the accumulated tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    /// Similarity thresholds.
    pub t: usize,
    /// Recall grid points.
    pub r: usize,
    /// Categories (1 when categories are pooled).
    pub k: usize,
    /// Size ranges.
    pub a: usize,
    /// Detection caps.
    pub m: usize,
}

impl TensorShape {
    pub fn precision_len(&self) -> usize {
        self.t * self.r * self.k * self.a * self.m
    }

    pub fn recall_len(&self) -> usize {
        self.t * self.k * self.a * self.m
    }

    pub fn precision_idx(&self, t: usize, r: usize, k: usize, a: usize, m: usize) -> usize {
        (((t * self.r + r) * self.k + k) * self.a + a) * self.m + m
    }

    pub fn recall_idx(&self, t: usize, k: usize, a: usize, m: usize) -> usize {
        ((t * self.k + k) * self.a + a) * self.m + m
    }
}

/// Accumulated precision, recall and score tensors.
///
/// `precision` and `scores` are indexed `[T x R x K x A x M]`, `recall` is
/// `[T x K x A x M]`. Slices with no non-ignored ground truth hold
/// [`SENTINEL`].
#[derive(Debug, Clone)]
pub struct Accumulation {
    pub params: Arc<Params>,
    pub shape: TensorShape,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    /// Detection score at which each precision sample was reached.
    pub scores: Vec<f64>,
}

impl Accumulation {
    pub fn precision_at(&self, t: usize, r: usize, k: usize, a: usize, m: usize) -> f64 {
        self.precision[self.shape.precision_idx(t, r, k, a, m)]
    }

    pub fn score_at(&self, t: usize, r: usize, k: usize, a: usize, m: usize) -> f64 {
        self.scores[self.shape.precision_idx(t, r, k, a, m)]
    }

    pub fn recall_at(&self, t: usize, k: usize, a: usize, m: usize) -> f64 {
        self.recall[self.shape.recall_idx(t, k, a, m)]
    }

    /// Interpolated precision over the recall grid for one slice.
    pub fn precision_curve(&self, t: usize, k: usize, a: usize, m: usize) -> Vec<f64> {
        (0..self.shape.r)
            .map(|r| self.precision_at(t, r, k, a, m))
            .collect()
    }

    /// Average precision of category index `k` over all thresholds, or
    /// [`SENTINEL`] when the category has no positives in this slice.
    pub fn category_ap(&self, k: usize, a: usize, m: usize) -> f64 {
        let values: Vec<f64> = (0..self.shape.t)
            .flat_map(|t| (0..self.shape.r).map(move |r| (t, r)))
            .map(|(t, r)| self.precision_at(t, r, k, a, m))
            .filter(|&p| p > SENTINEL)
            .collect();
        if values.is_empty() {
            SENTINEL
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }
}

/// Curves of one (category, size range, cap) slice, for every threshold.
struct SliceCurves {
    /// `[T x R]`
    precision: Vec<f64>,
    /// `[T x R]`
    scores: Vec<f64>,
    /// `[T]`
    recall: Vec<f64>,
}

/// Detections of one group, concatenated image by image.
struct RankedDetections {
    scores: Vec<f64>,
    /// `[T][D]` whether the detection is matched.
    matched: Vec<Vec<bool>>,
    /// `[T][D]`
    ignored: Vec<Vec<bool>>,
    positives: usize,
}

impl RankedDetections {
    /// Concatenate records, keeping each image's top `cap` detections, then
    /// rank the result by descending score (stable).
    fn collect<'a>(
        records: impl Iterator<Item = &'a MatchRecord>,
        cap: usize,
        num_thresholds: usize,
    ) -> Self {
        let mut scores = Vec::new();
        let mut matched = vec![Vec::new(); num_thresholds];
        let mut ignored = vec![Vec::new(); num_thresholds];
        let mut positives = 0;

        for record in records {
            let nd = record.dt_scores.len().min(cap);
            scores.extend_from_slice(&record.dt_scores[..nd]);
            for t in 0..num_thresholds {
                matched[t].extend(record.dt_matches[t][..nd].iter().map(|&id| id != 0));
                ignored[t].extend_from_slice(&record.dt_ignore[t][..nd]);
            }
            positives += record.num_positives();
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        Self {
            scores: order.iter().map(|&i| scores[i]).collect(),
            matched: matched
                .iter()
                .map(|row| order.iter().map(|&i| row[i]).collect())
                .collect(),
            ignored: ignored
                .iter()
                .map(|row| order.iter().map(|&i| row[i]).collect())
                .collect(),
            positives,
        }
    }
}

/// Precision envelope and recall-grid interpolation for one threshold.
///
/// Returns `(precision on grid, score on grid, final recall)`. Grid points
/// beyond the highest recall reached keep precision and score 0.
fn interpolate(
    matched: &[bool],
    ignored: &[bool],
    scores: &[f64],
    positives: usize,
    recall_thresholds: &[f64],
) -> (Vec<f64>, Vec<f64>, f64) {
    let nd = matched.len();
    let mut recall = Vec::with_capacity(nd);
    let mut precision = Vec::with_capacity(nd);

    let (mut tp, mut fp) = (0usize, 0usize);
    for (&is_match, &is_ignored) in matched.iter().zip(ignored) {
        if !is_ignored {
            if is_match {
                tp += 1;
            } else {
                fp += 1;
            }
        }
        recall.push(tp as f64 / positives as f64);
        precision.push(if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        });
    }

    let final_recall = recall.last().copied().unwrap_or(0.0);

    // Envelope: each rank takes the best precision at any later rank.
    for d in (0..nd.saturating_sub(1)).rev() {
        precision[d] = precision[d].max(precision[d + 1]);
    }

    let mut grid_precision = vec![0.0; recall_thresholds.len()];
    let mut grid_scores = vec![0.0; recall_thresholds.len()];
    let mut rank = 0;
    for (i, &threshold) in recall_thresholds.iter().enumerate() {
        while rank < nd && recall[rank] < threshold {
            rank += 1;
        }
        if rank == nd {
            break;
        }
        grid_precision[i] = precision[rank];
        grid_scores[i] = scores[rank];
    }

    (grid_precision, grid_scores, final_recall)
}

fn accumulate_slice(
    detections: &RankedDetections,
    recall_thresholds: &[f64],
) -> Option<SliceCurves> {
    if detections.positives == 0 {
        return None;
    }

    let mut curves = SliceCurves {
        precision: Vec::with_capacity(detections.matched.len() * recall_thresholds.len()),
        scores: Vec::with_capacity(detections.matched.len() * recall_thresholds.len()),
        recall: Vec::with_capacity(detections.matched.len()),
    };
    for (matched, ignored) in detections.matched.iter().zip(&detections.ignored) {
        let (precision, scores, recall) = interpolate(
            matched,
            ignored,
            &detections.scores,
            detections.positives,
            recall_thresholds,
        );
        curves.precision.extend(precision);
        curves.scores.extend(scores);
        curves.recall.push(recall);
    }
    Some(curves)
}

/// Accumulate per-image match records into precision/recall tensors.
///
/// # Errors
///
/// Returns the first per-image failure recorded in `evaluation`: a group
/// with a missing image cannot produce reliable totals.
pub fn accumulate(evaluation: &Evaluation) -> Result<Accumulation> {
    if let Some(failure) = evaluation.failures().first() {
        return Err(EvalError::precondition(
            failure.image_id,
            failure.category_id,
            format!(
                "cannot accumulate, {} image(s) failed to evaluate: {}",
                evaluation.failures().len(),
                failure.message
            ),
        ));
    }

    let params = Arc::clone(evaluation.params());
    let shape = TensorShape {
        t: params.iou_thresholds.len(),
        r: params.recall_thresholds.len(),
        k: evaluation.category_ids().len(),
        a: params.area_ranges.len(),
        m: params.max_detections.len(),
    };

    let work_items: Vec<(usize, usize, usize)> = (0..shape.k)
        .flat_map(|k| (0..shape.a).flat_map(move |a| (0..shape.m).map(move |m| (k, a, m))))
        .collect();

    let results: Vec<((usize, usize, usize), Option<SliceCurves>)> = work_items
        .par_iter()
        .map(|&(k, a, m)| {
            let ranked = RankedDetections::collect(
                evaluation.records(k, a),
                params.max_detections[m],
                shape.t,
            );
            ((k, a, m), accumulate_slice(&ranked, &params.recall_thresholds))
        })
        .collect();

    let mut precision = vec![SENTINEL; shape.precision_len()];
    let mut scores = vec![SENTINEL; shape.precision_len()];
    let mut recall = vec![SENTINEL; shape.recall_len()];

    let mut empty_slices = 0;
    for ((k, a, m), curves) in results {
        let Some(curves) = curves else {
            empty_slices += 1;
            continue;
        };
        for t in 0..shape.t {
            recall[shape.recall_idx(t, k, a, m)] = curves.recall[t];
            for r in 0..shape.r {
                let idx = shape.precision_idx(t, r, k, a, m);
                precision[idx] = curves.precision[t * shape.r + r];
                scores[idx] = curves.scores[t * shape.r + r];
            }
        }
    }

    debug!("{} of {} slices have no positives", empty_slices, work_items.len());
    info!(
        "accumulated {} categories x {} size ranges x {} caps",
        shape.k, shape.a, shape.m
    );

    Ok(Accumulation {
        params,
        shape,
        precision,
        recall,
        scores,
    })
}
