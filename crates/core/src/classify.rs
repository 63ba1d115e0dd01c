//! Outcome classifiers for missing references and image mismatches
//!
//! Both classifiers return `Err(StateError)` for the failure they classify.
//! The assertion command records those errors instead of returning them;
//! anything else they return (I/O failures while updating a reference) is an
//! infrastructure error.

use tracing::{info, warn};

use crate::config::RefUpdateMode;
use crate::error::{AssertViewResult, ImageDiff, StateError};
use crate::events::{AssertViewEvent, EventEmitter};
use crate::results::Outcome;
use crate::types::{CapturedImage, ReferenceImage, TestIdentity};

/// Handles the case where no reference image exists yet
#[derive(Debug, Clone)]
pub struct NoRefImageHandler {
    mode: RefUpdateMode,
    events: EventEmitter,
}

impl NoRefImageHandler {
    pub fn new(mode: RefUpdateMode, events: EventEmitter) -> Self {
        Self { mode, events }
    }

    pub async fn handle(
        &self,
        test: &TestIdentity,
        state_name: &str,
        current: CapturedImage,
        reference: ReferenceImage,
    ) -> AssertViewResult<Outcome> {
        if self.mode.adopts_missing() {
            let reference = update_reference(&current, reference).await?;
            info!("Created reference for '{}' at {}", state_name, reference.path.display());
            self.events.emit(AssertViewEvent::ReferenceUpdated {
                test: test.clone(),
                state_name: state_name.to_string(),
                reference_path: reference.path.clone(),
            });
            return Ok(Outcome::Success {
                state_name: state_name.to_string(),
                reference_image: reference,
                updated: true,
            });
        }

        info!("No reference for '{}' at {}", state_name, reference.path.display());
        self.events.emit(AssertViewEvent::NewBaseline {
            test: test.clone(),
            state_name: state_name.to_string(),
            current_path: current.path.clone(),
            reference_path: reference.path.clone(),
        });

        Err(StateError::NoRefImage {
            state_name: state_name.to_string(),
            current,
            reference,
        }
        .into())
    }
}

/// Handles a reference that exists but does not match the current image
#[derive(Debug, Clone)]
pub struct ImageDiffHandler {
    mode: RefUpdateMode,
    events: EventEmitter,
}

impl ImageDiffHandler {
    pub fn new(mode: RefUpdateMode, events: EventEmitter) -> Self {
        Self { mode, events }
    }

    pub async fn handle(&self, test: &TestIdentity, diff: ImageDiff) -> AssertViewResult<Outcome> {
        if self.mode.overwrites_mismatch() {
            let reference = update_reference(&diff.current, diff.reference).await?;
            info!("Updated reference for '{}' at {}", diff.state_name, reference.path.display());
            self.events.emit(AssertViewEvent::ReferenceUpdated {
                test: test.clone(),
                state_name: diff.state_name.clone(),
                reference_path: reference.path.clone(),
            });
            return Ok(Outcome::Success {
                state_name: diff.state_name,
                reference_image: reference,
                updated: true,
            });
        }

        warn!(
            "Visual regression detected in '{}': diff bounds {:?} (tolerance: {}, antialiasing tolerance: {})",
            diff.state_name, diff.diff_bounds, diff.tolerance, diff.antialiasing_tolerance
        );
        self.events.emit(AssertViewEvent::MismatchFound {
            test: test.clone(),
            state_name: diff.state_name.clone(),
            current_path: diff.current.path.clone(),
            reference_path: diff.reference.path.clone(),
            diff_bounds: diff.diff_bounds,
            diff_clusters: diff.diff_clusters.clone(),
        });

        Err(StateError::ImageDiff(Box::new(diff)).into())
    }
}

/// Copy the current image over the reference, creating parent directories
async fn update_reference(current: &CapturedImage, mut reference: ReferenceImage) -> AssertViewResult<ReferenceImage> {
    if let Some(parent) = reference.path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&current.path, &reference.path).await?;
    reference.size = Some(current.size);
    Ok(reference)
}
