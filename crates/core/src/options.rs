//! Layered assertion options
//!
//! Options come from three layers: the run configuration, the test, and the
//! call site. [`MergedOptions::resolve`] folds them into one fully specified
//! record before the assertion touches the page.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::Selectors;

/// One layer of assertion options; unset fields fall through to the layer below
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssertViewOpts {
    pub ignore_elements: Option<Selectors>,
    pub allow_viewport_overflow: Option<bool>,
    pub capture_element_from_top: Option<bool>,
    pub composite_image: Option<bool>,
    /// Delay before taking the screenshot, in milliseconds
    pub screenshot_delay: Option<u64>,
    pub tolerance: Option<f64>,
    pub antialiasing_tolerance: Option<f64>,
}

impl AssertViewOpts {
    /// Fill every unset field of `self` from `lower`
    pub fn or(self, lower: &AssertViewOpts) -> AssertViewOpts {
        AssertViewOpts {
            ignore_elements: self.ignore_elements.or_else(|| lower.ignore_elements.clone()),
            allow_viewport_overflow: self.allow_viewport_overflow.or(lower.allow_viewport_overflow),
            capture_element_from_top: self.capture_element_from_top.or(lower.capture_element_from_top),
            composite_image: self.composite_image.or(lower.composite_image),
            screenshot_delay: self.screenshot_delay.or(lower.screenshot_delay),
            tolerance: self.tolerance.or(lower.tolerance),
            antialiasing_tolerance: self.antialiasing_tolerance.or(lower.antialiasing_tolerance),
        }
    }
}

/// Fully resolved options for a single assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedOptions {
    pub ignore_elements: Vec<String>,
    pub allow_viewport_overflow: bool,
    pub capture_element_from_top: bool,
    pub composite_image: bool,
    pub screenshot_delay: Duration,
    pub tolerance: f64,
    pub antialiasing_tolerance: f64,
}

impl Default for MergedOptions {
    fn default() -> Self {
        Self {
            ignore_elements: Vec::new(),
            allow_viewport_overflow: false,
            capture_element_from_top: true,
            composite_image: true,
            screenshot_delay: Duration::ZERO,
            tolerance: 2.3,
            antialiasing_tolerance: 0.0,
        }
    }
}

impl MergedOptions {
    /// Resolve call-site over per-test over run-level options
    pub fn resolve(call_site: &AssertViewOpts, per_test: &AssertViewOpts, run_level: &MergedOptions) -> MergedOptions {
        let layered = call_site.clone().or(per_test);

        MergedOptions {
            ignore_elements: layered
                .ignore_elements
                .map(Selectors::into_vec)
                .unwrap_or_else(|| run_level.ignore_elements.clone()),
            allow_viewport_overflow: layered
                .allow_viewport_overflow
                .unwrap_or(run_level.allow_viewport_overflow),
            capture_element_from_top: layered
                .capture_element_from_top
                .unwrap_or(run_level.capture_element_from_top),
            composite_image: layered.composite_image.unwrap_or(run_level.composite_image),
            screenshot_delay: layered
                .screenshot_delay
                .map(Duration::from_millis)
                .unwrap_or(run_level.screenshot_delay),
            tolerance: layered.tolerance.unwrap_or(run_level.tolerance),
            antialiasing_tolerance: layered
                .antialiasing_tolerance
                .unwrap_or(run_level.antialiasing_tolerance),
        }
    }
}
