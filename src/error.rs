//! Error types for the coco-eval-engine library.

use thiserror::Error;

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Error types that can occur while loading, matching or accumulating.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error during JSON parsing or serialization.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error during I/O operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid annotation data.
    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    /// Invalid bounding box coordinates.
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// Empty dataset provided.
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// Invalid evaluation parameters. Raised before any matching starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single (image, category) unit could not be matched.
    /// `category_id` is `None` when categories are pooled.
    #[error("Precondition failed for image {image_id}: {message}")]
    Precondition {
        image_id: u64,
        category_id: Option<u64>,
        message: String,
    },

    /// A stage was invoked before the stage it depends on.
    #[error("Sequencing error: {0}")]
    Sequencing(String),
}

impl EvalError {
    pub(crate) fn precondition(
        image_id: u64,
        category_id: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        EvalError::Precondition {
            image_id,
            category_id,
            message: message.into(),
        }
    }
}
