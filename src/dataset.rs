//! Dataset lookup used by the evaluator.
//!
//! The evaluator only needs a handful of queries, captured by [`Dataset`].
//! [`CocoIndex`] answers them for an in-memory [`CocoDataset`].

use std::collections::{BTreeSet, HashMap};

use crate::types::{Annotation, Category, CocoDataset, Image};

/// Read-only view of an annotated dataset.
pub trait Dataset: Sync {
    /// All image ids, ascending.
    fn image_ids(&self) -> Vec<u64>;

    /// All category ids, ascending.
    fn category_ids(&self) -> Vec<u64>;

    /// Annotations of one image, optionally restricted to one category, in
    /// file order.
    fn image_annotations(&self, image_id: u64, category_id: Option<u64>) -> Vec<&Annotation>;

    /// Annotations whose image and category are both in the given sets.
    /// An empty set means "no restriction".
    fn annotations(&self, image_ids: &[u64], category_ids: &[u64]) -> Vec<&Annotation>;

    fn image(&self, image_id: u64) -> Option<&Image>;

    fn category(&self, category_id: u64) -> Option<&Category>;
}

/// Group annotation positions by (image_id, category_id).
pub fn group_annotations(annotations: &[Annotation]) -> HashMap<(u64, u64), Vec<usize>> {
    let mut groups: HashMap<(u64, u64), Vec<usize>> = HashMap::new();

    for (position, annotation) in annotations.iter().enumerate() {
        let key = (annotation.image_id, annotation.category_id);
        groups.entry(key).or_default().push(position);
    }

    groups
}

/// A [`CocoDataset`] with lookup tables.
#[derive(Debug, Clone)]
pub struct CocoIndex {
    dataset: CocoDataset,
    by_image_category: HashMap<(u64, u64), Vec<usize>>,
    by_image: HashMap<u64, Vec<usize>>,
    images: HashMap<u64, usize>,
    categories: HashMap<u64, usize>,
    image_ids: Vec<u64>,
}

impl CocoIndex {
    pub fn new(dataset: CocoDataset) -> Self {
        let by_image_category = group_annotations(&dataset.annotations);

        let mut by_image: HashMap<u64, Vec<usize>> = HashMap::new();
        for (position, annotation) in dataset.annotations.iter().enumerate() {
            by_image.entry(annotation.image_id).or_default().push(position);
        }

        let images: HashMap<u64, usize> = dataset
            .images
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, img)| (img.id, i))
            .collect();

        let categories = dataset
            .categories
            .iter()
            .enumerate()
            .map(|(i, cat)| (cat.id, i))
            .collect();

        // Without an image table, the annotated images define the id set.
        let image_ids: BTreeSet<u64> = match &dataset.images {
            Some(list) => list.iter().map(|img| img.id).collect(),
            None => by_image.keys().copied().collect(),
        };

        Self {
            dataset,
            by_image_category,
            by_image,
            images,
            categories,
            image_ids: image_ids.into_iter().collect(),
        }
    }

    pub fn dataset(&self) -> &CocoDataset {
        &self.dataset
    }

    fn resolve(&self, positions: Option<&Vec<usize>>) -> Vec<&Annotation> {
        positions
            .map(|ps| ps.iter().map(|&p| &self.dataset.annotations[p]).collect())
            .unwrap_or_default()
    }
}

impl From<CocoDataset> for CocoIndex {
    fn from(dataset: CocoDataset) -> Self {
        Self::new(dataset)
    }
}

impl Dataset for CocoIndex {
    fn image_ids(&self) -> Vec<u64> {
        self.image_ids.clone()
    }

    fn category_ids(&self) -> Vec<u64> {
        let ids: BTreeSet<u64> = self.dataset.categories.iter().map(|c| c.id).collect();
        ids.into_iter().collect()
    }

    fn image_annotations(&self, image_id: u64, category_id: Option<u64>) -> Vec<&Annotation> {
        match category_id {
            Some(cat) => self.resolve(self.by_image_category.get(&(image_id, cat))),
            None => self.resolve(self.by_image.get(&image_id)),
        }
    }

    fn annotations(&self, image_ids: &[u64], category_ids: &[u64]) -> Vec<&Annotation> {
        self.dataset
            .annotations
            .iter()
            .filter(|ann| image_ids.is_empty() || image_ids.contains(&ann.image_id))
            .filter(|ann| category_ids.is_empty() || category_ids.contains(&ann.category_id))
            .collect()
    }

    fn image(&self, image_id: u64) -> Option<&Image> {
        let images = self.dataset.images.as_ref()?;
        self.images.get(&image_id).map(|&i| &images[i])
    }

    fn category(&self, category_id: u64) -> Option<&Category> {
        self.categories
            .get(&category_id)
            .map(|&i| &self.dataset.categories[i])
    }
}
