//! Similarity providers.
//!
//! The matcher never computes overlap itself: it hands the ordered
//! detections and ground truths to a [`Similarity`] and receives a dense
//! `detections x ground_truths` matrix with values in `[0, 1]`.

pub mod iou;
pub mod oks;

pub use iou::{calculate_crowd_iou, calculate_iou, calculate_iou_matrix, BoxIou};
pub use oks::KeypointOks;

use crate::error::Result;
use crate::params::{Params, SimilarityKind};
use crate::types::Annotation;

/// Dense similarity matrix, `matrix[d][g]`.
pub type SimilarityMatrix = Vec<Vec<f64>>;

/// Computes pairwise similarity between detections and ground truths.
pub trait Similarity: Send + Sync {
    /// Similarity of every detection (rows) against every ground truth
    /// (columns). Both slices arrive in matching order.
    fn compute(
        &self,
        detections: &[&Annotation],
        ground_truths: &[&Annotation],
    ) -> Result<SimilarityMatrix>;
}

/// Reference provider for the configured similarity kind.
pub fn similarity_for(params: &Params) -> Box<dyn Similarity> {
    match params.kind {
        SimilarityKind::Bbox => Box::new(BoxIou),
        SimilarityKind::Keypoints => Box::new(KeypointOks::new(params.keypoint_sigmas.clone())),
    }
}
