//! Test runner: executes specs step by step and records visual assertions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use viewcheck_core::{
    encode_name, AssertView, DiffRequest, ErrorKind, EventEmitter, ImageComparator, Outcome,
    PatternReferenceStore, PixelComparator, ResultAggregator, RunConfig, TempDirAllocator, TestContext,
};

use crate::error::{E2eError, E2eResult};
use crate::playwright::{BrowserLauncher, BrowserPage};
use crate::spec::{TestSpec, TestStep};

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Diff image rendered for a mismatched state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffImage {
    pub state_name: String,
    pub path: PathBuf,
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub test_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub assertions: ResultAggregator,
    pub diff_images: Vec<DiffImage>,
    pub error: Option<String>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub browser_id: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub run: RunConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            specs_dir: PathBuf::from("tests/visual/specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Runs test specs one after another in a single browser type
pub struct TestRunner<L> {
    launcher: L,
    config: RunnerConfig,
    comparator: Arc<dyn ImageComparator>,
    temp: Arc<TempDirAllocator>,
    events: EventEmitter,
}

impl<L: BrowserLauncher> TestRunner<L> {
    pub fn new(config: RunnerConfig, launcher: L) -> E2eResult<Self> {
        config.run.validate()?;
        let temp = Arc::new(TempDirAllocator::new(&config.run.temp)?);

        Ok(Self {
            launcher,
            config,
            comparator: Arc::new(PixelComparator::new()),
            temp,
            events: EventEmitter::default(),
        })
    }

    /// Use a different image comparator
    pub fn with_comparator(mut self, comparator: Arc<dyn ImageComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Assertion events of every test this runner executes
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run all tests in the specs directory
    pub async fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        Ok(self.run_specs(&specs).await)
    }

    /// Run tests matching a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag).into_iter().cloned().collect();
        Ok(self.run_specs(&filtered).await)
    }

    /// Run a specific test by name
    pub async fn run_test(&self, name: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.config.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::TestNotFound(name.to_string()))?;
        Ok(self.run_specs(std::slice::from_ref(&spec)).await)
    }

    /// Run a list of test specs
    pub async fn run_specs(&self, specs: &[TestSpec]) -> TestSuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::with_capacity(specs.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} test(s) in {}...", specs.len(), self.config.run.browser_id);

        for spec in specs {
            let result = match self.run_spec(spec).await {
                Ok(result) => result,
                Err(e) => TestResult {
                    name: spec.name.clone(),
                    test_id: spec.identity(&self.config.run.browser_id).id(),
                    success: false,
                    duration_ms: 0,
                    steps: vec![],
                    assertions: ResultAggregator::new(),
                    diff_images: vec![],
                    error: Some(e.to_string()),
                },
            };

            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!("Test Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        TestSuiteResult {
            browser_id: self.config.run.browser_id.clone(),
            started_at,
            total: specs.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Run a single test spec in a fresh page
    pub async fn run_spec(&self, spec: &TestSpec) -> E2eResult<TestResult> {
        let start = Instant::now();
        debug!("Running test: {}", spec.name);

        let page = Arc::new(self.launcher.launch(spec.viewport).await?);
        let command = AssertView::new(
            &self.config.run,
            page.clone(),
            self.comparator.clone(),
            Arc::new(PatternReferenceStore::new(self.config.run.screenshots_path.clone())),
            self.temp.clone(),
            self.events.clone(),
        );

        let identity = spec.identity(&self.config.run.browser_id);
        let test_id = identity.id();
        let mut ctx = TestContext::new(identity).with_opts(spec.assert_view_opts.clone());

        let mut steps = Vec::with_capacity(spec.steps.len());
        let mut test_error: Option<String> = None;

        for step in &spec.steps {
            let step_start = Instant::now();
            let outcome = match step {
                TestStep::AssertView {
                    state,
                    selectors,
                    options,
                } => match command.assert_view(&mut ctx, state, selectors.clone(), options).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        if e.kind() == ErrorKind::Infrastructure {
                            ctx.results_mut().add(Outcome::UnexpectedFailure { error: e.to_string() });
                        }
                        Err(E2eError::from(e))
                    }
                },
                _ => page.perform(step).await,
            };

            let failed = outcome.as_ref().err().map(ToString::to_string);
            steps.push(StepResult {
                success: failed.is_none(),
                step_name: step.label(),
                duration_ms: step_start.elapsed().as_millis() as u64,
                error: failed.clone(),
            });

            // Stop on first failure
            if let Some(reason) = failed {
                test_error = Some(format!("{}: {}", step.label(), reason));
                break;
            }
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close page for '{}': {}", spec.name, e);
        }

        let assertions = ctx.into_results();
        let diff_images = self.render_diffs(&test_id, &assertions).await;

        if test_error.is_none() {
            if let Err(failure) = assertions.verdict() {
                test_error = Some(failure.to_string());
            }
        }

        Ok(TestResult {
            name: spec.name.clone(),
            test_id,
            success: test_error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            assertions,
            diff_images,
            error: test_error,
        })
    }

    /// Render `<output>/diffs/<test_id>/<state>.png` for every mismatch
    async fn render_diffs(&self, test_id: &str, assertions: &ResultAggregator) -> Vec<DiffImage> {
        let mut images = Vec::new();

        for outcome in assertions.outcomes() {
            let Outcome::Mismatch {
                state_name,
                current_image,
                reference_image,
                tolerance,
                antialiasing_tolerance,
                ..
            } = outcome
            else {
                continue;
            };

            let dir = self.config.output_dir.join("diffs").join(test_id);
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                warn!("Can not create {}: {}", dir.display(), e);
                continue;
            }

            let request = DiffRequest {
                reference: reference_image.path.clone(),
                current: current_image.path.clone(),
                diff: dir.join(format!("{}.png", encode_name(state_name))),
                tolerance: *tolerance,
                antialiasing_tolerance: *antialiasing_tolerance,
                highlight_color: self.config.run.diff_color.clone(),
            };

            match self.comparator.build_diff(&request).await {
                Ok(()) => images.push(DiffImage {
                    state_name: state_name.clone(),
                    path: request.diff,
                }),
                Err(e) => warn!("Failed to render diff for '{}': {}", state_name, e),
            }
        }

        images
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
