//! The `assert_view` command
//!
//! One call asserts one named state: capture, check for a reference, compare,
//! classify, record. Every stage is awaited before the next starts.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capture::{CaptureOpts, PrepareOpts, ScreenshotCapturer};
use crate::classify::{ImageDiffHandler, NoRefImageHandler};
use crate::compare::{CompareOpts, CompareRequest, ImageComparator};
use crate::config::RunConfig;
use crate::error::{AssertViewError, AssertViewResult, ImageDiff};
use crate::events::EventEmitter;
use crate::options::{AssertViewOpts, MergedOptions};
use crate::reference::ReferenceStore;
use crate::results::{Outcome, ResultAggregator};
use crate::temp::TempAllocator;
use crate::types::{CapturedImage, PageInfo, ReferenceImage, Selectors, TestIdentity};

/// Suffix of every current screenshot
const IMAGE_SUFFIX: &str = ".png";

/// Execution context of a single test, owned by the test framework
#[derive(Debug, Clone)]
pub struct TestContext {
    identity: TestIdentity,
    opts: AssertViewOpts,
    results: Option<ResultAggregator>,
}

impl TestContext {
    pub fn new(identity: TestIdentity) -> Self {
        Self {
            identity,
            opts: AssertViewOpts::default(),
            results: None,
        }
    }

    /// Per-test assertion defaults
    pub fn with_opts(mut self, opts: AssertViewOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    pub fn opts(&self) -> &AssertViewOpts {
        &self.opts
    }

    /// The result store, if any assertion has run yet
    pub fn results(&self) -> Option<&ResultAggregator> {
        self.results.as_ref()
    }

    /// The result store, created on first use
    pub fn results_mut(&mut self) -> &mut ResultAggregator {
        self.results.get_or_insert_with(ResultAggregator::new)
    }

    /// Consume the context, yielding its (possibly empty) result store
    pub fn into_results(self) -> ResultAggregator {
        self.results.unwrap_or_default()
    }
}

/// Asserts named visual states against reference images
pub struct AssertView {
    capturer: Arc<dyn ScreenshotCapturer>,
    comparator: Arc<dyn ImageComparator>,
    references: Arc<dyn ReferenceStore>,
    temp: Arc<dyn TempAllocator>,
    base_options: MergedOptions,
    compare_opts: CompareOpts,
    no_ref: NoRefImageHandler,
    image_diff: ImageDiffHandler,
}

impl AssertView {
    pub fn new(
        config: &RunConfig,
        capturer: Arc<dyn ScreenshotCapturer>,
        comparator: Arc<dyn ImageComparator>,
        references: Arc<dyn ReferenceStore>,
        temp: Arc<dyn TempAllocator>,
        events: EventEmitter,
    ) -> Self {
        Self {
            capturer,
            comparator,
            references,
            temp,
            base_options: config.base_options(),
            compare_opts: config.compare_opts.clone(),
            no_ref: NoRefImageHandler::new(config.update_refs, events.clone()),
            image_diff: ImageDiffHandler::new(config.update_refs, events),
        }
    }

    /// Assert the state `state_name` of the area covered by `selectors`.
    ///
    /// Missing references and mismatches are recorded in the context's result
    /// store and reported as `Ok(())`. A duplicate state name and any
    /// infrastructure failure are returned without recording anything.
    pub async fn assert_view(
        &self,
        ctx: &mut TestContext,
        state_name: &str,
        selectors: impl Into<Selectors>,
        opts: &AssertViewOpts,
    ) -> AssertViewResult<()> {
        let opts = MergedOptions::resolve(opts, &ctx.opts, &self.base_options);
        let selectors = selectors.into();

        if ctx.results_mut().has_state(state_name) {
            return Err(AssertViewError::DuplicateState {
                state_name: state_name.to_string(),
            });
        }

        debug!("Asserting view '{}' of {:?}", state_name, selectors.as_slice());

        let page = self.prepare(&selectors, &opts).await?;
        let current = self.capture(&page, &opts).await?;

        let reference = ReferenceImage::new(self.references.resolve_path(&ctx.identity, state_name));
        ctx.results_mut().record_used_reference_path(reference.path.clone());

        let outcome = self
            .classify(&ctx.identity, state_name, current, reference, &page, &opts)
            .await;
        Self::settle(ctx.results_mut(), outcome)
    }

    async fn prepare(&self, selectors: &Selectors, opts: &MergedOptions) -> AssertViewResult<PageInfo> {
        let prepare_opts = PrepareOpts {
            ignore_selectors: opts.ignore_elements.clone(),
            allow_viewport_overflow: opts.allow_viewport_overflow,
            capture_element_from_top: opts.capture_element_from_top,
        };
        self.capturer.prepare(selectors.as_slice(), &prepare_opts).await
    }

    async fn capture(&self, page: &PageInfo, opts: &MergedOptions) -> AssertViewResult<CapturedImage> {
        let capture_opts = CaptureOpts {
            allow_viewport_overflow: opts.allow_viewport_overflow,
            composite_image: opts.composite_image,
            screenshot_delay: opts.screenshot_delay,
        };
        let screenshot = self.capturer.capture(page, &capture_opts).await?;

        let current = CapturedImage {
            path: self.temp.path(IMAGE_SUFFIX)?,
            size: screenshot.size(),
        };
        screenshot.save(&current.path).await?;
        Ok(current)
    }

    async fn classify(
        &self,
        test: &TestIdentity,
        state_name: &str,
        current: CapturedImage,
        mut reference: ReferenceImage,
        page: &PageInfo,
        opts: &MergedOptions,
    ) -> AssertViewResult<Outcome> {
        if !reference_exists(&reference.path).await? {
            return self.no_ref.handle(test, state_name, current, reference).await;
        }

        let request = CompareRequest {
            reference: reference.path.clone(),
            current: current.path.clone(),
            tolerance: opts.tolerance,
            antialiasing_tolerance: opts.antialiasing_tolerance,
            can_have_caret: page.can_have_caret,
            pixel_ratio: page.pixel_ratio,
            compare_opts: self.compare_opts.clone(),
        };
        let result = self.comparator.compare(&request).await?;

        if let Some(size) = result.meta_info.reference_image.and_then(|meta| meta.size) {
            reference.size = Some(size);
        }

        if result.equal {
            info!("View '{}' matches its reference", state_name);
            return Ok(Outcome::success(state_name, reference));
        }

        let diff = ImageDiff {
            state_name: state_name.to_string(),
            current,
            reference,
            diff_bounds: result.diff_bounds,
            diff_clusters: result.diff_clusters,
            tolerance: opts.tolerance,
            antialiasing_tolerance: opts.antialiasing_tolerance,
            can_have_caret: page.can_have_caret,
        };
        self.image_diff.handle(test, diff).await
    }

    /// Record state errors, return everything else
    fn settle(results: &mut ResultAggregator, outcome: AssertViewResult<Outcome>) -> AssertViewResult<()> {
        match outcome {
            Ok(outcome) => {
                results.add(outcome);
                Ok(())
            }
            Err(AssertViewError::State(err)) => {
                results.add(Outcome::from(err));
                Ok(())
            }
            // Duplicates fail fast instead of being recorded
            Err(err @ AssertViewError::DuplicateState { .. }) => Err(err),
            Err(
                err @ (AssertViewError::Capture(_)
                | AssertViewError::Compare(_)
                | AssertViewError::Reference(_)
                | AssertViewError::InvalidConfig(_)
                | AssertViewError::Io(_)
                | AssertViewError::Image(_)
                | AssertViewError::Json(_)
                | AssertViewError::Toml(_)),
            ) => Err(err),
        }
    }
}

async fn reference_exists(path: &Path) -> AssertViewResult<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| AssertViewError::Reference(format!("can not check {}: {}", path.display(), e)))
}
