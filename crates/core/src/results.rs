//! Per-test result store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AssertViewFailure, StateError};
use crate::types::{CapturedImage, Rect, ReferenceImage};

/// Outcome of asserting one state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        state_name: String,
        reference_image: ReferenceImage,
        /// The reference was written from the current image
        #[serde(default)]
        updated: bool,
    },

    NewBaseline {
        state_name: String,
        current_image: CapturedImage,
        reference_image: ReferenceImage,
    },

    Mismatch {
        state_name: String,
        diff_bounds: Option<Rect>,
        diff_clusters: Vec<Rect>,
        current_image: CapturedImage,
        reference_image: ReferenceImage,
        tolerance: f64,
        antialiasing_tolerance: f64,
        can_have_caret: bool,
    },

    UnexpectedFailure {
        error: String,
    },
}

impl Outcome {
    pub fn success(state_name: impl Into<String>, reference_image: ReferenceImage) -> Self {
        Outcome::Success {
            state_name: state_name.into(),
            reference_image,
            updated: false,
        }
    }

    pub fn state_name(&self) -> Option<&str> {
        match self {
            Outcome::Success { state_name, .. }
            | Outcome::NewBaseline { state_name, .. }
            | Outcome::Mismatch { state_name, .. } => Some(state_name),
            Outcome::UnexpectedFailure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// One-line description used in failure reports
    pub fn describe(&self) -> String {
        match self {
            Outcome::Success { state_name, .. } => format!("\"{}\": ok", state_name),
            Outcome::NewBaseline {
                state_name,
                reference_image,
                ..
            } => format!(
                "\"{}\": no reference image at {}",
                state_name,
                reference_image.path.display()
            ),
            Outcome::Mismatch {
                state_name,
                diff_bounds,
                tolerance,
                ..
            } => match diff_bounds {
                Some(b) => format!(
                    "\"{}\": images differ in area top={} left={} right={} bottom={} (tolerance: {})",
                    state_name, b.top, b.left, b.right, b.bottom, tolerance
                ),
                None => format!("\"{}\": images differ (tolerance: {})", state_name, tolerance),
            },
            Outcome::UnexpectedFailure { error } => format!("unexpected failure: {}", error),
        }
    }
}

impl From<StateError> for Outcome {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NoRefImage {
                state_name,
                current,
                reference,
            } => Outcome::NewBaseline {
                state_name,
                current_image: current,
                reference_image: reference,
            },
            StateError::ImageDiff(diff) => Outcome::Mismatch {
                state_name: diff.state_name,
                diff_bounds: diff.diff_bounds,
                diff_clusters: diff.diff_clusters,
                current_image: diff.current,
                reference_image: diff.reference,
                tolerance: diff.tolerance,
                antialiasing_tolerance: diff.antialiasing_tolerance,
                can_have_caret: diff.can_have_caret,
            },
        }
    }
}

/// Outcomes and consulted reference paths for one test execution.
///
/// Holds at most one outcome per state name; callers check
/// [`ResultAggregator::has_state`] before adding. Access is sequential by
/// construction: mutation needs `&mut self`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultAggregator {
    results: Vec<Outcome>,
    used_reference_paths: Vec<PathBuf>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_state(&self, state_name: &str) -> bool {
        self.get(state_name).is_some()
    }

    pub fn get(&self, state_name: &str) -> Option<&Outcome> {
        self.results.iter().find(|o| o.state_name() == Some(state_name))
    }

    /// Append an outcome; nothing is replaced
    pub fn add(&mut self, outcome: Outcome) {
        self.results.push(outcome);
    }

    pub fn record_used_reference_path(&mut self, path: impl Into<PathBuf>) {
        self.used_reference_paths.push(path.into());
    }

    /// Outcomes in insertion order
    pub fn outcomes(&self) -> &[Outcome] {
        &self.results
    }

    pub fn used_reference_paths(&self) -> &[PathBuf] {
        &self.used_reference_paths
    }

    pub fn uses_reference(&self, path: &Path) -> bool {
        self.used_reference_paths.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn has_fails(&self) -> bool {
        self.results.iter().any(|o| !o.is_success())
    }

    /// `Ok` when every recorded outcome succeeded; otherwise every failure is listed
    pub fn verdict(&self) -> Result<(), AssertViewFailure> {
        let failures: Vec<String> = self
            .results
            .iter()
            .filter(|o| !o.is_success())
            .map(Outcome::describe)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AssertViewFailure {
                total: self.results.len(),
                failures,
            })
        }
    }
}
