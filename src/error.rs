// ============================================================================
// ERRORS
// ============================================================================

use thiserror::Error;

/// Out-of-order use of the stroke API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeError {
    #[error("a stroke is already in progress")]
    AlreadyStarted,
    #[error("no stroke in progress")]
    NotStarted,
    #[error("the current layer is not an image layer")]
    NoImageLayer,
}

/// Invalid structural edits on the layer tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("no layer at path {0:?}")]
    InvalidPath(Vec<usize>),
    #[error("the root group cannot be removed or moved")]
    CannotRemoveRoot,
    #[error("layer at path {0:?} is not a group")]
    NotAGroup(Vec<usize>),
    #[error("layer at path {0:?} is not an image layer")]
    NotAnImage(Vec<usize>),
}

#[derive(Error, Debug)]
pub enum PaintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PNG encoding failed: {0}")]
    PngEncode(#[from] png::EncodingError),

    #[error("PNG decoding failed: {0}")]
    PngDecode(#[from] png::DecodingError),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    Stroke(#[from] StrokeError),

    #[error(transparent)]
    Layer(#[from] LayerError),
}

pub type Result<T> = std::result::Result<T, PaintError>;
