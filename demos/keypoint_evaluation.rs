//! Keypoint (OKS) evaluation example.

use coco_eval_engine::dataset::CocoIndex;
use coco_eval_engine::evaluator::Evaluator;
use coco_eval_engine::params::{Params, SimilarityKind};
use coco_eval_engine::types::{Annotation, Category, CocoDataset};

/// A 17-keypoint pose laid out on a grid inside `[x, y, 120, 160]`.
fn pose(x: f64, y: f64, jitter: f64, visibility: f64) -> Vec<f64> {
    (0..17)
        .flat_map(|i| {
            let px = x + 20.0 + (i % 4) as f64 * 25.0 + jitter * ((i % 3) as f64 - 1.0);
            let py = y + 10.0 + (i / 4) as f64 * 35.0 + jitter * ((i % 2) as f64);
            [px, py, visibility]
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("=== COCO Keypoint Evaluation Example ===\n");

    let categories = vec![Category {
        id: 1,
        name: "person".to_string(),
        supercategory: Some("person".to_string()),
    }];

    let ground_truth = CocoDataset {
        images: None,
        annotations: vec![
            Annotation::new(1, 1, 1, vec![0.0, 0.0, 120.0, 160.0])
                .with_keypoints(pose(0.0, 0.0, 0.0, 2.0)),
            Annotation::new(2, 1, 1, vec![300.0, 0.0, 120.0, 160.0])
                .with_keypoints(pose(300.0, 0.0, 0.0, 2.0)),
            Annotation::new(3, 2, 1, vec![50.0, 50.0, 60.0, 80.0])
                .with_keypoints(pose(50.0, 50.0, 0.0, 1.0)),
        ],
        categories: categories.clone(),
    };

    // Predictions drift further from the truth as their score drops.
    let detections = CocoDataset {
        images: None,
        annotations: vec![
            Annotation::new(1, 1, 1, vec![0.0, 0.0, 120.0, 160.0])
                .with_keypoints(pose(0.0, 0.0, 2.0, 1.0))
                .with_score(0.92),
            Annotation::new(2, 1, 1, vec![300.0, 0.0, 120.0, 160.0])
                .with_keypoints(pose(300.0, 0.0, 8.0, 1.0))
                .with_score(0.81),
            Annotation::new(3, 2, 1, vec![50.0, 50.0, 60.0, 80.0])
                .with_keypoints(pose(50.0, 50.0, 15.0, 1.0))
                .with_score(0.40),
        ],
        categories,
    };

    let gt = CocoIndex::new(ground_truth);
    let dt = CocoIndex::new(detections);
    let mut evaluator = Evaluator::new(&gt, &dt, Params::new(SimilarityKind::Keypoints))?;
    evaluator.evaluate()?;
    evaluator.accumulate()?;
    print!("{}", evaluator.summarize()?);

    println!("\n=== Example Complete ===");

    Ok(())
}
