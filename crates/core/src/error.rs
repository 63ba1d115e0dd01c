//! Error types for visual assertions

use thiserror::Error;

use crate::types::{CapturedImage, Rect, ReferenceImage};

/// Result type alias using the assertion error
pub type AssertViewResult<T> = std::result::Result<T, AssertViewError>;

/// How an error is handled at the dispatch point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fails the test but not the script: recorded, not thrown
    State,
    /// Aborts the current assertion and reaches the caller
    Infrastructure,
}

/// Errors raised while asserting a view
#[derive(Error, Debug)]
pub enum AssertViewError {
    #[error("duplicate name for \"{state_name}\" state")]
    DuplicateState { state_name: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Comparison error: {0}")]
    Compare(String),

    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AssertViewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssertViewError::DuplicateState { .. } | AssertViewError::State(_) => ErrorKind::State,
            AssertViewError::Capture(_)
            | AssertViewError::Compare(_)
            | AssertViewError::Reference(_)
            | AssertViewError::InvalidConfig(_)
            | AssertViewError::Io(_)
            | AssertViewError::Image(_)
            | AssertViewError::Json(_)
            | AssertViewError::Toml(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_state_error(&self) -> bool {
        self.kind() == ErrorKind::State
    }
}

/// Recoverable per-state failures produced by the outcome classifiers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("can not find reference image at {} for \"{state_name}\" state", reference.path.display())]
    NoRefImage {
        state_name: String,
        current: CapturedImage,
        reference: ReferenceImage,
    },

    #[error("images are different for \"{}\" state", .0.state_name)]
    ImageDiff(Box<ImageDiff>),
}

impl StateError {
    pub fn state_name(&self) -> &str {
        match self {
            StateError::NoRefImage { state_name, .. } => state_name,
            StateError::ImageDiff(diff) => &diff.state_name,
        }
    }
}

/// Diff evidence attached to a mismatch
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDiff {
    pub state_name: String,
    pub current: CapturedImage,
    pub reference: ReferenceImage,
    pub diff_bounds: Option<Rect>,
    pub diff_clusters: Vec<Rect>,
    pub tolerance: f64,
    pub antialiasing_tolerance: f64,
    pub can_have_caret: bool,
}

/// A test whose result store holds at least one failed state
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} of {total} visual state(s) failed:\n{}", failures.len(), failures.join("\n"))]
pub struct AssertViewFailure {
    pub total: usize,
    /// One line per failed outcome, in recording order
    pub failures: Vec<String>,
}
