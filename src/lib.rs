//! # coco-eval-engine
//!
//! A Rust library implementing the COCO evaluation protocol for object
//! detection (box IoU) and human pose estimation (keypoint OKS).
//!
//! The pipeline has three stages:
//!
//! - **Matching**: for every image, category and object-size range, each
//!   detection is greedily matched to its best ground truth at every
//!   similarity threshold.
//! - **Accumulation**: the matches are ranked by score and turned into
//!   interpolated precision/recall tensors.
//! - **Summarizing**: the tensors are averaged into the standard statistics
//!   (AP, AP50, AP75, AR at several detection caps, per-size AP/AR).
//!
//! ## Quick Start
//!
//! ```no_run
//! use coco_eval_engine::evaluator::evaluate;
//! use coco_eval_engine::params::{Params, SimilarityKind};
//! use coco_eval_engine::{load_detections_from_file, load_from_file};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ground_truth = load_from_file("instances_val.json")?;
//! let detections = load_detections_from_file("results.json", &ground_truth)?;
//!
//! let summary = evaluate(&ground_truth, &detections, Params::new(SimilarityKind::Bbox))?;
//! print!("{}", summary);
//! println!("AP: {:.4}", summary.get("AP").unwrap_or(-1.0));
//! # Ok(())
//! # }
//! ```
//!
//! ## COCO Format
//!
//! Ground truth files use the standard COCO JSON layout:
//!
//! ```json
//! {
//!   "images": [{ "id": 1, "file_name": "a.jpg", "height": 480, "width": 640 }],
//!   "annotations": [
//!     {
//!       "id": 1,
//!       "image_id": 1,
//!       "category_id": 1,
//!       "bbox": [x, y, width, height],
//!       "area": 1200.0,
//!       "iscrowd": 0
//!     }
//!   ],
//!   "categories": [{ "id": 1, "name": "person" }]
//! }
//! ```
//!
//! Detection files are a flat list of results:
//!
//! ```json
//! [{ "image_id": 1, "category_id": 1, "bbox": [x, y, width, height], "score": 0.95 }]
//! ```

pub mod accumulate;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod matching;
pub mod params;
pub mod similarity;
pub mod summary;
pub mod types;

// Re-export commonly used types and functions
pub use accumulate::{Accumulation, SENTINEL};
pub use dataset::{CocoIndex, Dataset};
pub use error::{EvalError, Result};
pub use evaluator::{evaluate, Evaluation, Evaluator};
pub use loader::{
    load_detections_from_file, load_detections_from_str, load_from_file, load_from_string,
};
pub use matching::MatchRecord;
pub use params::{AreaRange, Params, SimilarityKind};
pub use similarity::{BoxIou, KeypointOks, Similarity};
pub use summary::{Summary, SummaryConfig};
pub use types::{Annotation, BoundingBox, Category, CocoDataset, Image};
