//! Error types for the runner

use thiserror::Error;
use viewcheck_core::AssertViewError;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Driver exited unexpectedly")]
    DriverClosed,

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Test not found: {0}")]
    TestNotFound(String),

    #[error(transparent)]
    AssertView(#[from] AssertViewError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

impl From<E2eError> for AssertViewError {
    /// Browser failures during capture surface as capture errors
    fn from(err: E2eError) -> Self {
        match err {
            E2eError::AssertView(inner) => inner,
            other => AssertViewError::Capture(other.to_string()),
        }
    }
}
