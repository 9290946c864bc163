//! Tests for the loader, dataset index and core types.

use coco_eval_engine::dataset::{CocoIndex, Dataset};
use coco_eval_engine::loader::{load_detections_from_str, load_from_string};
use coco_eval_engine::types::{Annotation, BoundingBox, Category, CocoDataset, Image};

fn ground_truth_json() -> &'static str {
    r#"{
        "images": [
            {"id": 3, "file_name": "c.jpg", "height": 480, "width": 640},
            {"id": 1, "file_name": "a.jpg", "height": 480, "width": 640},
            {"id": 2, "file_name": "b.jpg", "height": 480, "width": 640}
        ],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 1, "bbox": [10, 10, 20, 30], "area": 500.0, "iscrowd": 0},
            {"id": 2, "image_id": 1, "category_id": 2, "bbox": [50, 50, 10, 10], "iscrowd": 1},
            {"id": 3, "image_id": 2, "category_id": 1, "bbox": [0, 0, 5, 5], "ignore": 1},
            {"id": 4, "image_id": 1, "category_id": 1, "bbox": [70, 70, 5, 5]}
        ],
        "categories": [
            {"id": 2, "name": "car", "supercategory": "vehicle"},
            {"id": 1, "name": "person"}
        ]
    }"#
}

#[test]
fn test_bounding_box_accessors() {
    let bbox = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
    assert_eq!(bbox.area(), 1200.0);
    assert_eq!(bbox.right(), 40.0);
    assert_eq!(bbox.bottom(), 60.0);
    assert!(bbox.is_valid());
    assert!(!BoundingBox::new(0.0, 0.0, 0.0, 5.0).is_valid());
    assert_eq!(bbox.to_vec(), vec![10.0, 20.0, 30.0, 40.0]);
}

#[test]
fn test_annotation_to_bbox_invalid_length() {
    let ann = Annotation {
        id: 1,
        image_id: 1,
        category_id: 1,
        bbox: vec![1.0, 2.0, 3.0],
        ..Annotation::default()
    };
    assert!(ann.to_bbox().is_err());
}

#[test]
fn test_annotation_area_fallbacks() {
    let explicit = Annotation::new(1, 1, 1, vec![0.0, 0.0, 10.0, 10.0]).with_area(42.0);
    assert_eq!(explicit.area(), 42.0);

    let from_box = Annotation {
        id: 2,
        image_id: 1,
        category_id: 1,
        bbox: vec![0.0, 0.0, 4.0, 5.0],
        ..Annotation::default()
    };
    assert_eq!(from_box.area(), 20.0);

    let shapeless = Annotation {
        id: 3,
        ..Annotation::default()
    };
    assert_eq!(shapeless.area(), 0.0);
}

#[test]
fn test_annotation_flags() {
    let ann = Annotation::new(1, 1, 1, vec![0.0, 0.0, 10.0, 10.0]);
    assert!(!ann.is_crowd());
    assert!(!ann.is_marked_ignore());
    assert_eq!(ann.confidence(), 1.0);

    let crowd = ann.clone().crowd().with_score(0.25);
    assert!(crowd.is_crowd());
    assert_eq!(crowd.confidence(), 0.25);
}

#[test]
fn test_load_ground_truth() {
    let gt = load_from_string(ground_truth_json()).unwrap();
    assert_eq!(gt.annotations.len(), 4);
    assert_eq!(gt.annotations[0].area, Some(500.0));
    assert!(gt.annotations[1].is_crowd());
    assert!(gt.annotations[2].is_marked_ignore());
    assert_eq!(gt.categories[0].supercategory.as_deref(), Some("vehicle"));
}

#[test]
fn test_index_lookups() {
    let index = CocoIndex::new(load_from_string(ground_truth_json()).unwrap());

    assert_eq!(index.image_ids(), vec![1, 2, 3]);
    assert_eq!(index.category_ids(), vec![1, 2]);

    let ids = |anns: Vec<&Annotation>| anns.iter().map(|a| a.id).collect::<Vec<_>>();
    assert_eq!(ids(index.image_annotations(1, Some(1))), vec![1, 4]);
    assert_eq!(ids(index.image_annotations(1, None)), vec![1, 2, 4]);
    assert!(index.image_annotations(3, Some(1)).is_empty());
    assert_eq!(ids(index.annotations(&[1, 2], &[1])), vec![1, 3, 4]);
    assert_eq!(ids(index.annotations(&[], &[])), vec![1, 2, 3, 4]);

    assert_eq!(index.image(2).map(|img| img.file_name.as_str()), Some("b.jpg"));
    assert_eq!(index.category(2).map(|c| c.name.as_str()), Some("car"));
    assert!(index.image(9).is_none());
}

#[test]
fn test_index_without_image_table() {
    let dataset = CocoDataset {
        images: None,
        annotations: vec![
            Annotation::new(1, 7, 1, vec![0.0, 0.0, 1.0, 1.0]),
            Annotation::new(2, 4, 1, vec![0.0, 0.0, 1.0, 1.0]),
        ],
        categories: vec![Category {
            id: 1,
            name: "person".to_string(),
            supercategory: None,
        }],
    };
    let index = CocoIndex::from(dataset);
    assert_eq!(index.image_ids(), vec![4, 7]);
    assert!(index.image(4).is_none());
}

#[test]
fn test_load_box_detections() {
    let gt = load_from_string(ground_truth_json()).unwrap();
    let dt = load_detections_from_str(
        r#"[
            {"image_id": 1, "category_id": 1, "bbox": [10, 10, 20, 30], "score": 0.9},
            {"image_id": 2, "category_id": 1, "bbox": [0, 0, 4, 4], "score": 0.4}
        ]"#,
        &gt,
    )
    .unwrap();

    assert_eq!(dt.annotations.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(dt.annotations[0].area, Some(600.0));
    assert_eq!(dt.annotations[1].score, Some(0.4));
    assert!(!dt.annotations[1].is_crowd());
    assert_eq!(dt.images.as_ref().map(Vec::len), Some(3));
    assert_eq!(dt.categories, gt.categories);
}

#[test]
fn test_load_keypoint_detections() {
    let gt = load_from_string(ground_truth_json()).unwrap();
    let dt = load_detections_from_str(
        r#"[{"image_id": 1, "category_id": 1, "keypoints": [10, 20, 1, 30, 60, 1, 20, 40, 0], "score": 0.7}]"#,
        &gt,
    )
    .unwrap();

    let ann = &dt.annotations[0];
    assert_eq!(ann.bbox, vec![10.0, 20.0, 20.0, 40.0]);
    assert_eq!(ann.area, Some(800.0));
    assert_eq!(ann.keypoints.as_ref().map(Vec::len), Some(9));
}

#[test]
fn test_image_roundtrip_fields() {
    let image: Image = serde_json::from_str(r#"{"id": 5, "height": 10, "width": 20}"#).unwrap();
    assert_eq!(image.file_name, "");
    assert_eq!((image.height, image.width), (10, 20));
}
