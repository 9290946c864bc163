//! Basic box evaluation example demonstrating the staged pipeline.
//!
//! Run with `RUST_LOG=debug` to see per-stage logging.

use coco_eval_engine::dataset::{CocoIndex, Dataset};
use coco_eval_engine::evaluator::Evaluator;
use coco_eval_engine::params::{Params, SimilarityKind};
use coco_eval_engine::similarity::calculate_iou;
use coco_eval_engine::{load_detections_from_str, load_from_string, BoundingBox};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("=== COCO Box Evaluation Example ===\n");

    // Example 1: IoU Calculation
    println!("1. IoU Calculation");
    let bbox1 = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
    let bbox2 = BoundingBox::new(30.0, 30.0, 50.0, 50.0);
    println!("   IoU between overlapping boxes: {:.4}", calculate_iou(&bbox1, &bbox2));
    println!();

    // Example 2: Load COCO annotations
    println!("2. Loading COCO Annotations");
    let ground_truth_json = r#"{
        "images": [
            {"id": 1, "file_name": "image1.jpg", "height": 480, "width": 640},
            {"id": 2, "file_name": "image2.jpg", "height": 480, "width": 640}
        ],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 1, "bbox": [100.0, 100.0, 200.0, 150.0], "area": 30000.0, "iscrowd": 0},
            {"id": 2, "image_id": 1, "category_id": 2, "bbox": [350.0, 200.0, 100.0, 120.0], "area": 12000.0, "iscrowd": 0},
            {"id": 3, "image_id": 2, "category_id": 1, "bbox": [20.0, 30.0, 25.0, 40.0], "area": 1000.0, "iscrowd": 0},
            {"id": 4, "image_id": 2, "category_id": 1, "bbox": [300.0, 50.0, 200.0, 200.0], "area": 40000.0, "iscrowd": 1}
        ],
        "categories": [
            {"id": 1, "name": "person", "supercategory": "human"},
            {"id": 2, "name": "car", "supercategory": "vehicle"}
        ]
    }"#;

    let ground_truth = load_from_string(ground_truth_json)?;
    println!("   Loaded {} ground truth annotations", ground_truth.annotations.len());
    println!();

    // Example 3: Load detection results
    println!("3. Loading Detection Results");
    let results_json = r#"[
        {"image_id": 1, "category_id": 1, "bbox": [105.0, 98.0, 195.0, 155.0], "score": 0.95},
        {"image_id": 1, "category_id": 2, "bbox": [348.0, 198.0, 105.0, 125.0], "score": 0.87},
        {"image_id": 1, "category_id": 1, "bbox": [50.0, 50.0, 80.0, 90.0], "score": 0.42},
        {"image_id": 2, "category_id": 1, "bbox": [22.0, 28.0, 24.0, 42.0], "score": 0.77},
        {"image_id": 2, "category_id": 1, "bbox": [320.0, 60.0, 60.0, 80.0], "score": 0.66},
        {"image_id": 2, "category_id": 1, "bbox": [400.0, 120.0, 70.0, 90.0], "score": 0.61}
    ]"#;
    let detections = load_detections_from_str(results_json, &ground_truth)?;
    println!("   Loaded {} detections", detections.annotations.len());
    println!();

    // Example 4: Staged evaluation
    println!("4. Running Evaluation");
    let gt = CocoIndex::new(ground_truth);
    let dt = CocoIndex::new(detections);
    let mut evaluator = Evaluator::new(&gt, &dt, Params::new(SimilarityKind::Bbox))?;

    let evaluation = evaluator.evaluate()?;
    let matched = evaluation.all_records().count();
    println!("   Matched {} (image, category, area) groups", matched);

    evaluator.accumulate()?;
    let summary = evaluator.summarize()?.clone();
    println!();
    print!("{}", summary);
    println!();

    // Example 5: Per-category AP
    println!("5. Per-Category AP");
    if let (Some(evaluation), Some(acc)) = (evaluator.evaluation(), evaluator.accumulation()) {
        let params = evaluator.params();
        let (all, cap) = (params.area_index("all"), params.cap_index(params.max_detection_cap()));
        if let (Some(a), Some(m)) = (all, cap) {
            for (k, category_id) in evaluation.category_ids().iter().enumerate() {
                let name = category_id
                    .and_then(|id| gt.category(id))
                    .map_or("all", |c| c.name.as_str());
                println!("   ├─ {}: {:.4}", name, acc.category_ap(k, a, m));
            }
        }
    }
    println!();

    // Example 6: Re-run at a single threshold
    println!("6. Re-running at IoU=0.50 only");
    evaluator.set_params(Params::new(SimilarityKind::Bbox).with_iou_thresholds(vec![0.5]))?;
    evaluator.evaluate()?;
    evaluator.accumulate()?;
    let ap50 = evaluator.summarize()?.get("AP").unwrap_or(-1.0);
    println!("   AP@0.50: {:.4}", ap50);
    println!();

    println!("=== Example Complete ===");

    Ok(())
}
