//! Main evaluation orchestrator.
//!
//! Evaluation runs in three stages:
//!
//! 1. [`evaluate_images`] matches detections to ground truth per image,
//!    category and size range.
//! 2. [`accumulate`](crate::accumulate::accumulate) aggregates the matches
//!    into precision/recall tensors.
//! 3. [`summarize`](crate::summary::summarize) reduces the tensors to named
//!    statistics.
//!
//! [`Evaluator`] drives the stages in order and keeps their results. Each
//! pass works on a shared, immutable snapshot of the parameters.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;

use crate::accumulate::{accumulate, Accumulation};
use crate::dataset::{CocoIndex, Dataset};
use crate::error::{EvalError, Result};
use crate::matching::{ImageMatcher, MatchRecord};
use crate::params::{Params, SimilarityKind};
use crate::similarity::{similarity_for, Similarity};
use crate::summary::{detection_configs, keypoint_configs, summarize, Summary, SummaryConfig};
use crate::types::{Annotation, CocoDataset};

/// An (image, category) pair that could not be matched.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub image_id: u64,
    pub category_id: Option<u64>,
    pub message: String,
}

/// Output of the matching stage.
///
/// Records are laid out category-major, then size range, then image, so the
/// records of one (category, size range) group are contiguous.
#[derive(Debug, Clone)]
pub struct Evaluation {
    params: Arc<Params>,
    image_ids: Vec<u64>,
    category_ids: Vec<Option<u64>>,
    records: Vec<Option<MatchRecord>>,
    failures: Vec<UnitFailure>,
}

impl Evaluation {
    /// Parameter snapshot the records were produced with.
    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    pub fn image_ids(&self) -> &[u64] {
        &self.image_ids
    }

    /// Category axis; a single `None` when categories are pooled.
    pub fn category_ids(&self) -> &[Option<u64>] {
        &self.category_ids
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    fn index(&self, k: usize, a: usize, i: usize) -> usize {
        (k * self.params.area_ranges.len() + a) * self.image_ids.len() + i
    }

    /// Record of one image for category index `k` and size range index `a`.
    pub fn record(&self, k: usize, a: usize, i: usize) -> Option<&MatchRecord> {
        self.records.get(self.index(k, a, i))?.as_ref()
    }

    /// Records of every contributing image of one group, in image order.
    pub fn records(&self, k: usize, a: usize) -> impl Iterator<Item = &MatchRecord> {
        let start = self.index(k, a, 0);
        self.records[start..start + self.image_ids.len()]
            .iter()
            .flatten()
    }

    /// Every record, group by group.
    pub fn all_records(&self) -> impl Iterator<Item = &MatchRecord> {
        self.records.iter().flatten()
    }
}

fn sorted_unique(ids: Vec<u64>) -> Vec<u64> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Annotations of one unit. A pooled unit concatenates the selected
/// categories in ascending id order.
fn unit_annotations<'d>(
    dataset: &'d dyn Dataset,
    image_id: u64,
    category_id: Option<u64>,
    pooled: &[u64],
) -> Vec<&'d Annotation> {
    match category_id {
        Some(category_id) => dataset.image_annotations(image_id, Some(category_id)),
        None => pooled
            .iter()
            .flat_map(|&c| dataset.image_annotations(image_id, Some(c)))
            .collect(),
    }
}

/// Match every (image, category) pair for every size range.
///
/// Pairs are processed in parallel. A pair that violates a precondition is
/// recorded in [`Evaluation::failures`] and leaves every other pair intact.
///
/// # Errors
///
/// Returns [`EvalError::Configuration`] when `params` do not validate.
pub fn evaluate_images(
    ground_truth: &dyn Dataset,
    detections: &dyn Dataset,
    params: Arc<Params>,
    similarity: &dyn Similarity,
) -> Result<Evaluation> {
    params.validate()?;

    let image_ids = if params.image_ids.is_empty() {
        ground_truth.image_ids()
    } else {
        sorted_unique(params.image_ids.clone())
    };
    let selected_categories = if params.category_ids.is_empty() {
        ground_truth.category_ids()
    } else {
        sorted_unique(params.category_ids.clone())
    };
    let category_ids: Vec<Option<u64>> = if params.use_categories {
        selected_categories.iter().copied().map(Some).collect()
    } else {
        vec![None]
    };

    info!(
        "evaluating {} images x {} categories ({})",
        image_ids.len(),
        category_ids.len(),
        params.kind
    );

    let units: Vec<(usize, usize)> = (0..category_ids.len())
        .flat_map(|k| (0..image_ids.len()).map(move |i| (k, i)))
        .collect();

    let outcomes: Vec<Result<Vec<Option<MatchRecord>>>> = units
        .par_iter()
        .map(|&(k, i)| {
            let (image_id, category_id) = (image_ids[i], category_ids[k]);
            let matcher = ImageMatcher::new(
                image_id,
                category_id,
                unit_annotations(ground_truth, image_id, category_id, &selected_categories),
                unit_annotations(detections, image_id, category_id, &selected_categories),
                &params,
                similarity,
            )?;
            Ok((0..params.area_ranges.len())
                .map(|a| matcher.match_range(a, &params))
                .collect())
        })
        .collect();

    let num_areas = params.area_ranges.len();
    let mut records = vec![None; category_ids.len() * num_areas * image_ids.len()];
    let mut failures = Vec::new();
    for (&(k, i), outcome) in units.iter().zip(outcomes) {
        match outcome {
            Ok(per_area) => {
                for (a, record) in per_area.into_iter().enumerate() {
                    records[(k * num_areas + a) * image_ids.len() + i] = record;
                }
            }
            Err(EvalError::Precondition {
                image_id,
                category_id,
                message,
            }) => {
                warn!("image {} category {:?}: {}", image_id, category_id, message);
                failures.push(UnitFailure {
                    image_id,
                    category_id,
                    message,
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok(Evaluation {
        params,
        image_ids,
        category_ids,
        records,
        failures,
    })
}

/// Standard summary statistics for the similarity kind.
pub fn default_summary_configs(params: &Params) -> Vec<SummaryConfig> {
    match params.kind {
        SimilarityKind::Bbox => detection_configs(params),
        SimilarityKind::Keypoints => keypoint_configs(params),
    }
}

/// Stateful driver for the evaluate, accumulate and summarize stages.
///
/// # Example
///
/// ```
/// use coco_eval_engine::dataset::CocoIndex;
/// use coco_eval_engine::evaluator::Evaluator;
/// use coco_eval_engine::params::{Params, SimilarityKind};
/// use coco_eval_engine::types::{Annotation, Category, CocoDataset};
///
/// # fn main() -> coco_eval_engine::Result<()> {
/// let categories = vec![Category { id: 1, name: "person".into(), supercategory: None }];
/// let gt = CocoIndex::new(CocoDataset {
///     images: None,
///     annotations: vec![Annotation::new(1, 1, 1, vec![10.0, 10.0, 50.0, 50.0])],
///     categories: categories.clone(),
/// });
/// let dt = CocoIndex::new(CocoDataset {
///     images: None,
///     annotations: vec![Annotation::new(1, 1, 1, vec![10.0, 10.0, 50.0, 50.0]).with_score(0.9)],
///     categories,
/// });
///
/// let mut evaluator = Evaluator::new(&gt, &dt, Params::new(SimilarityKind::Bbox))?;
/// evaluator.evaluate()?;
/// evaluator.accumulate()?;
/// let summary = evaluator.summarize()?;
/// assert_eq!(summary.get("AP"), Some(1.0));
/// # Ok(())
/// # }
/// ```
pub struct Evaluator<'a> {
    ground_truth: &'a dyn Dataset,
    detections: &'a dyn Dataset,
    params: Arc<Params>,
    similarity: Box<dyn Similarity>,
    custom_similarity: bool,
    evaluation: Option<Evaluation>,
    accumulation: Option<Accumulation>,
    summary: Option<Summary>,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator using the reference similarity for `params.kind`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Configuration`] when `params` do not validate.
    pub fn new(
        ground_truth: &'a dyn Dataset,
        detections: &'a dyn Dataset,
        params: Params,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            ground_truth,
            detections,
            similarity: similarity_for(&params),
            params: Arc::new(params),
            custom_similarity: false,
            evaluation: None,
            accumulation: None,
            summary: None,
        })
    }

    /// Replace the similarity provider.
    pub fn with_similarity(mut self, similarity: Box<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self.custom_similarity = true;
        self.reset();
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Install a new parameter snapshot for the next pass.
    ///
    /// Earlier stage results are dropped; they keep their own snapshot for as
    /// long as callers hold them.
    pub fn set_params(&mut self, params: Params) -> Result<()> {
        params.validate()?;
        if !self.custom_similarity {
            self.similarity = similarity_for(&params);
        }
        self.params = Arc::new(params);
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.evaluation = None;
        self.accumulation = None;
        self.summary = None;
    }

    /// Run per-image matching.
    ///
    /// The evaluation is kept even when some images fail, so the failures
    /// can be inspected, but the first failure is returned as the error.
    pub fn evaluate(&mut self) -> Result<&Evaluation> {
        self.reset();
        let evaluation = evaluate_images(
            self.ground_truth,
            self.detections,
            Arc::clone(&self.params),
            self.similarity.as_ref(),
        )?;

        let first_failure = evaluation.failures().first().cloned();
        let evaluation = self.evaluation.insert(evaluation);
        match first_failure {
            Some(failure) => Err(EvalError::precondition(
                failure.image_id,
                failure.category_id,
                failure.message,
            )),
            None => Ok(evaluation),
        }
    }

    /// Aggregate the matches into precision/recall tensors.
    pub fn accumulate(&mut self) -> Result<&Accumulation> {
        let evaluation = self
            .evaluation
            .as_ref()
            .ok_or_else(|| {
                EvalError::Sequencing("accumulate() called before evaluate()".to_string())
            })?;
        let accumulation = accumulate(evaluation)?;
        self.summary = None;
        Ok(self.accumulation.insert(accumulation))
    }

    /// Compute the standard statistics for the similarity kind.
    pub fn summarize(&mut self) -> Result<&Summary> {
        let configs = default_summary_configs(&self.params);
        self.summarize_with(&configs)
    }

    /// Compute the given statistics.
    pub fn summarize_with(&mut self, configs: &[SummaryConfig]) -> Result<&Summary> {
        let accumulation = self
            .accumulation
            .as_ref()
            .ok_or_else(|| {
                EvalError::Sequencing("summarize() called before accumulate()".to_string())
            })?;
        let summary = summarize(accumulation, configs);
        Ok(self.summary.insert(summary))
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    pub fn accumulation(&self) -> Option<&Accumulation> {
        self.accumulation.as_ref()
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }
}

/// Evaluate detections against ground truth in one call.
///
/// # Arguments
///
/// * `ground_truth` - Dataset containing ground truth annotations
/// * `detections` - Dataset containing detections with scores
/// * `params` - Evaluation parameters
///
/// # Returns
///
/// Returns the standard summary for `params.kind`.
pub fn evaluate(
    ground_truth: &CocoDataset,
    detections: &CocoDataset,
    params: Params,
) -> Result<Summary> {
    let gt = CocoIndex::new(ground_truth.clone());
    let dt = CocoIndex::new(detections.clone());

    let mut evaluator = Evaluator::new(&gt, &dt, params)?;
    evaluator.evaluate()?;
    evaluator.accumulate()?;
    Ok(evaluator.summarize()?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation, Category};

    fn create_test_dataset() -> CocoDataset {
        CocoDataset {
            images: None,
            annotations: vec![
                Annotation::new(1, 1, 1, vec![10.0, 10.0, 50.0, 50.0]).with_score(0.9)
            ],
            categories: vec![Category {
                id: 1,
                name: "person".to_string(),
                supercategory: None,
            }],
        }
    }

    #[test]
    fn test_evaluate_basic() {
        let dataset = create_test_dataset();
        let summary = evaluate(&dataset, &dataset, Params::default()).unwrap();
        assert_eq!(summary.stats.len(), 12);
        assert_eq!(summary.get("AP"), Some(1.0));
        // 2500 px² is a medium object.
        assert_eq!(summary.get("AP_small"), Some(-1.0));
    }

    #[test]
    fn test_record_layout() {
        let gt = CocoIndex::new(create_test_dataset());
        let params = Arc::new(Params::default());
        let evaluation = evaluate_images(&gt, &gt, params, &crate::similarity::BoxIou).unwrap();
        assert_eq!(evaluation.category_ids(), &[Some(1)]);
        assert_eq!(evaluation.records(0, 0).count(), 1);
        assert_eq!(evaluation.record(0, 2, 0).map(|r| r.area_index), Some(2));
        assert_eq!(evaluation.all_records().count(), 4);
    }

    #[test]
    fn test_sequencing() {
        let gt = CocoIndex::new(create_test_dataset());
        let mut evaluator = Evaluator::new(&gt, &gt, Params::default()).unwrap();
        assert!(matches!(evaluator.accumulate(), Err(EvalError::Sequencing(_))));
        assert!(matches!(evaluator.summarize(), Err(EvalError::Sequencing(_))));
    }
}
