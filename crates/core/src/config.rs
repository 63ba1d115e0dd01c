//! Run-level configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compare::CompareOpts;
use crate::error::{AssertViewError, AssertViewResult};
use crate::options::{AssertViewOpts, MergedOptions};

/// What to do with reference images when an assertion does not match them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefUpdateMode {
    /// Report missing and mismatching references as failures
    #[default]
    None,
    /// Adopt the current image when no reference exists yet
    Missing,
    /// Also overwrite references that do not match
    All,
}

impl RefUpdateMode {
    pub fn adopts_missing(&self) -> bool {
        matches!(self, RefUpdateMode::Missing | RefUpdateMode::All)
    }

    pub fn overwrites_mismatch(&self) -> bool {
        matches!(self, RefUpdateMode::All)
    }
}

/// Run configuration, shared by every test in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Browser the run targets
    pub browser_id: String,

    /// Reference path template; see [`crate::reference::PatternReferenceStore`]
    pub screenshots_path: String,

    pub tolerance: f64,
    pub antialiasing_tolerance: f64,
    pub composite_image: bool,

    /// Delay before each screenshot (milliseconds)
    pub screenshot_delay: u64,

    /// Browser-level assertion defaults, layered under per-test options
    pub assert_view_opts: AssertViewOpts,

    /// Passed through to the comparator untouched
    pub compare_opts: CompareOpts,

    /// Color used to highlight differing pixels in diff images
    pub diff_color: String,

    pub update_refs: RefUpdateMode,

    pub temp: TempConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        let base = MergedOptions::default();
        Self {
            browser_id: "chromium".to_string(),
            screenshots_path: "screens/{test_id}/{browser}/{state}.png".to_string(),
            tolerance: base.tolerance,
            antialiasing_tolerance: base.antialiasing_tolerance,
            composite_image: base.composite_image,
            screenshot_delay: 0,
            assert_view_opts: AssertViewOpts::default(),
            compare_opts: CompareOpts::default(),
            diff_color: "#ff00ff".to_string(),
            update_refs: RefUpdateMode::None,
            temp: TempConfig::default(),
        }
    }
}

/// Where current screenshots are written during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempConfig {
    /// Parent directory for the run's temp directory (system temp if unset)
    pub dir: Option<PathBuf>,
    pub prefix: String,
    /// Keep the run's temp directory after the run ends
    pub keep: bool,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: "viewcheck-".to_string(),
            keep: false,
        }
    }
}

impl RunConfig {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> AssertViewResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> AssertViewResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| AssertViewError::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> AssertViewResult<()> {
        if !self.screenshots_path.contains("{state}") {
            return Err(AssertViewError::InvalidConfig(format!(
                "screenshots_path must contain {{state}}: {}",
                self.screenshots_path
            )));
        }
        if self.tolerance < 0.0 || self.antialiasing_tolerance < 0.0 {
            return Err(AssertViewError::InvalidConfig(
                "tolerance values must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// The run-level layer of assertion options, fully specified
    pub fn base_options(&self) -> MergedOptions {
        let top_level = MergedOptions {
            composite_image: self.composite_image,
            screenshot_delay: Duration::from_millis(self.screenshot_delay),
            tolerance: self.tolerance,
            antialiasing_tolerance: self.antialiasing_tolerance,
            ..MergedOptions::default()
        };
        MergedOptions::resolve(&self.assert_view_opts, &AssertViewOpts::default(), &top_level)
    }
}
