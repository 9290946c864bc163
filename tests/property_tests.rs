//! Property-based tests using proptest
//!
//! These tests check invariants of matching and accumulation that must hold
//! for any input.

use std::sync::Arc;

use coco_eval_engine::accumulate::{accumulate, SENTINEL};
use coco_eval_engine::dataset::CocoIndex;
use coco_eval_engine::evaluator::evaluate_images;
use coco_eval_engine::params::Params;
use coco_eval_engine::similarity::{calculate_crowd_iou, calculate_iou, BoxIou};
use coco_eval_engine::types::{Annotation, BoundingBox, Category, CocoDataset, Image};
use proptest::prelude::*;

fn bbox_strategy() -> impl Strategy<Value = BoundingBox> {
    (0.0f64..500.0, 0.0f64..500.0, 1.0f64..200.0, 1.0f64..200.0)
        .prop_map(|(x, y, w, h)| BoundingBox::new(x, y, w, h))
}

/// (image, category, box, crowd)
fn gt_strategy() -> impl Strategy<Value = Vec<(u64, u64, BoundingBox, bool)>> {
    prop::collection::vec((1u64..4, 1u64..3, bbox_strategy(), prop::bool::weighted(0.1)), 0..20)
}

/// (image, category, box, score); scores are coarse so ties happen.
fn dt_strategy() -> impl Strategy<Value = Vec<(u64, u64, BoundingBox, f64)>> {
    prop::collection::vec(
        (1u64..4, 1u64..3, bbox_strategy(), (0u32..10).prop_map(|s| s as f64 / 10.0)),
        0..30,
    )
}

fn categories() -> Vec<Category> {
    vec![
        Category { id: 1, name: "a".to_string(), supercategory: None },
        Category { id: 2, name: "b".to_string(), supercategory: None },
    ]
}

fn build(
    gts: &[(u64, u64, BoundingBox, bool)],
    dts: &[(u64, u64, BoundingBox, f64)],
) -> (CocoIndex, CocoIndex) {
    let gt_annotations = gts
        .iter()
        .enumerate()
        .map(|(i, (img, cat, bbox, crowd))| {
            let ann = Annotation::new(i as u64 + 1, *img, *cat, bbox.to_vec());
            if *crowd {
                ann.crowd()
            } else {
                ann
            }
        })
        .collect();
    let dt_annotations = dts
        .iter()
        .enumerate()
        .map(|(i, (img, cat, bbox, score))| {
            Annotation::new(i as u64 + 1, *img, *cat, bbox.to_vec()).with_score(*score)
        })
        .collect();

    // Fixed image table so every image is evaluated.
    let images = (1..4)
        .map(|id| Image {
            id,
            file_name: format!("{}.jpg", id),
            height: 800,
            width: 800,
        })
        .collect::<Vec<_>>();

    (
        CocoIndex::new(CocoDataset {
            images: Some(images.clone()),
            annotations: gt_annotations,
            categories: categories(),
        }),
        CocoIndex::new(CocoDataset {
            images: Some(images),
            annotations: dt_annotations,
            categories: categories(),
        }),
    )
}

// Property: IoU is symmetric and bounded
proptest! {
    #[test]
    fn prop_iou_symmetric(a in bbox_strategy(), b in bbox_strategy()) {
        let ab = calculate_iou(&a, &b);
        let ba = calculate_iou(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&ab), "IoU out of range: {}", ab);
    }

    #[test]
    fn prop_crowd_iou_dominates_iou(a in bbox_strategy(), b in bbox_strategy()) {
        // Intersection over the detection area is never below intersection over union.
        prop_assert!(calculate_crowd_iou(&a, &b) + 1e-12 >= calculate_iou(&a, &b));
    }
}

// Property: match records are internally consistent
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_match_records_consistent(gts in gt_strategy(), dts in dt_strategy()) {
        let (gt, dt) = build(&gts, &dts);
        let evaluation = evaluate_images(&gt, &dt, Arc::new(Params::default()), &BoxIou).unwrap();

        for record in evaluation.all_records() {
            prop_assert!(record.is_consistent());
            prop_assert!(record.dt_ids.len() <= 100);
            // Scores are ranked descending.
            prop_assert!(record.dt_scores.windows(2).all(|w| w[0] >= w[1]));
            // A non-crowd ground truth is matched at most once per threshold.
            for row in &record.dt_matches {
                for (g, &gt_id) in record.gt_ids.iter().enumerate() {
                    if record.gt_ignore[g] {
                        continue;
                    }
                    prop_assert!(row.iter().filter(|&&m| m == gt_id).count() <= 1);
                }
            }
        }
    }

    #[test]
    fn prop_tensors_bounded_and_monotone(gts in gt_strategy(), dts in dt_strategy()) {
        let (gt, dt) = build(&gts, &dts);
        let evaluation = evaluate_images(&gt, &dt, Arc::new(Params::default()), &BoxIou).unwrap();
        let acc = accumulate(&evaluation).unwrap();
        let shape = acc.shape;

        for &p in acc.precision.iter().chain(&acc.recall) {
            prop_assert!(p == SENTINEL || (0.0..=1.0).contains(&p), "value out of range: {}", p);
        }

        for t in 0..shape.t {
            for k in 0..shape.k {
                for a in 0..shape.a {
                    for m in 0..shape.m {
                        let curve = acc.precision_curve(t, k, a, m);
                        prop_assert!(
                            curve.windows(2).all(|w| w[0] >= w[1]),
                            "curve not monotone: {:?}",
                            curve
                        );
                        // The sentinel marks whole slices, never single grid points.
                        let sentinel = acc.recall_at(t, k, a, m) == SENTINEL;
                        prop_assert!(curve.iter().all(|&p| (p == SENTINEL) == sentinel));
                    }
                }
            }
        }
    }

    #[test]
    fn prop_evaluation_deterministic(gts in gt_strategy(), dts in dt_strategy()) {
        let (gt, dt) = build(&gts, &dts);
        let params = Arc::new(Params::default());

        let first_eval = evaluate_images(&gt, &dt, Arc::clone(&params), &BoxIou).unwrap();
        let first = accumulate(&first_eval).unwrap();
        let second = accumulate(&evaluate_images(&gt, &dt, params, &BoxIou).unwrap()).unwrap();

        prop_assert_eq!(first.precision, second.precision);
        prop_assert_eq!(first.recall, second.recall);
        prop_assert_eq!(first.scores, second.scores);
    }
}
