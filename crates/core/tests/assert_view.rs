//! End-to-end behaviour of `AssertView` against fake collaborators

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use viewcheck_core::{
    AssertView, AssertViewError, AssertViewEvent, AssertViewOpts, AssertViewResult, CaptureOpts,
    CapturedScreenshot, CompareMeta, CompareRequest, CompareResult, DiffRequest, EventEmitter,
    ImageComparator, ImageSize, Outcome, PageInfo, PatternReferenceStore, PrepareOpts, Rect,
    ReferenceMeta, RefUpdateMode, RgbaScreenshot, RunConfig, ScreenshotCapturer, TempConfig,
    TempDirAllocator, TestContext, TestIdentity,
};

#[derive(Default)]
struct FakeCapturer {
    prepared: Mutex<Vec<(Vec<String>, PrepareOpts)>>,
    captures: AtomicUsize,
    fail_capture: bool,
    can_have_caret: bool,
}

#[async_trait]
impl ScreenshotCapturer for FakeCapturer {
    async fn prepare(&self, selectors: &[String], opts: &PrepareOpts) -> AssertViewResult<PageInfo> {
        self.prepared.lock().unwrap().push((selectors.to_vec(), opts.clone()));
        Ok(PageInfo {
            capture_area: Rect::new(0.0, 0.0, 4.0, 4.0),
            ignore_areas: vec![],
            viewport: Rect::new(0.0, 0.0, 800.0, 600.0),
            pixel_ratio: 2.0,
            can_have_caret: self.can_have_caret,
        })
    }

    async fn capture(&self, _page: &PageInfo, _opts: &CaptureOpts) -> AssertViewResult<Box<dyn CapturedScreenshot>> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail_capture {
            return Err(AssertViewError::Capture("browser went away".into()));
        }
        let image = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        Ok(Box::new(RgbaScreenshot::new(image)))
    }
}

struct FakeComparator {
    result: AssertViewResult<CompareResult>,
    requests: Mutex<Vec<CompareRequest>>,
}

impl FakeComparator {
    fn returning(result: CompareResult) -> Self {
        Self {
            result: Ok(result),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            result: Err(AssertViewError::Compare("comparator crashed".into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageComparator for FakeComparator {
    async fn compare(&self, request: &CompareRequest) -> AssertViewResult<CompareResult> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.result {
            Ok(result) => Ok(result.clone()),
            Err(e) => Err(AssertViewError::Compare(e.to_string())),
        }
    }

    async fn build_diff(&self, _request: &DiffRequest) -> AssertViewResult<()> {
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    capturer: Arc<FakeCapturer>,
    comparator: Arc<FakeComparator>,
    events: EventEmitter,
    command: AssertView,
}

impl Harness {
    fn new(capturer: FakeCapturer, comparator: FakeComparator) -> Self {
        Self::with_config(capturer, comparator, RunConfig::default())
    }

    fn with_config(capturer: FakeCapturer, comparator: FakeComparator, mut config: RunConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        config.screenshots_path = format!("{}/ref/{{state}}.png", dir.path().display());
        config.temp = TempConfig {
            dir: Some(dir.path().join("tmp")),
            ..Default::default()
        };

        let capturer = Arc::new(capturer);
        let comparator = Arc::new(comparator);
        let events = EventEmitter::default();
        let command = AssertView::new(
            &config,
            capturer.clone(),
            comparator.clone(),
            Arc::new(PatternReferenceStore::new(config.screenshots_path.clone())),
            Arc::new(TempDirAllocator::new(&config.temp).unwrap()),
            events.clone(),
        );

        Self {
            dir,
            capturer,
            comparator,
            events,
            command,
        }
    }

    fn reference(&self, state: &str) -> PathBuf {
        self.dir.path().join("ref").join(format!("{}.png", state))
    }

    fn create_reference(&self, state: &str) -> PathBuf {
        let path = self.reference(state);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])).save(&path).unwrap();
        path
    }
}

fn context() -> TestContext {
    TestContext::new(TestIdentity::new("page header", "specs/header.yaml", "chromium"))
}

fn no_opts() -> AssertViewOpts {
    AssertViewOpts::default()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<AssertViewEvent>) -> Vec<AssertViewEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn missing_reference_records_new_baseline() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(CompareResult::equal()));
    let mut rx = h.events.subscribe();
    let mut ctx = context();

    h.command.assert_view(&mut ctx, "header", ".header", &no_opts()).await.unwrap();

    let results = ctx.results().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results.get("header"),
        Some(Outcome::NewBaseline { state_name, .. }) if state_name == "header"
    ));
    assert_eq!(results.used_reference_paths(), &[h.reference("header")]);
    assert_eq!(h.comparator.calls(), 0);

    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [AssertViewEvent::NewBaseline { .. }]));
}

#[tokio::test]
async fn equal_images_record_success_without_mismatch_event() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(CompareResult::equal()));
    h.create_reference("nav");
    let mut rx = h.events.subscribe();
    let mut ctx = context();

    h.command.assert_view(&mut ctx, "nav", ".nav", &no_opts()).await.unwrap();

    let results = ctx.results().unwrap();
    assert!(matches!(results.get("nav"), Some(Outcome::Success { updated: false, .. })));
    assert!(!results.has_fails());
    assert_eq!(h.comparator.calls(), 1);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn mismatch_is_recorded_with_exact_diff_evidence() {
    let bounds = Rect::new(0.0, 0.0, 10.0, 10.0);
    let clusters = vec![Rect::new(0.0, 0.0, 3.0, 3.0), Rect::new(7.0, 7.0, 10.0, 10.0)];
    let h = Harness::new(
        FakeCapturer::default(),
        FakeComparator::returning(CompareResult::different(bounds, clusters.clone())),
    );
    h.create_reference("footer");
    let mut rx = h.events.subscribe();
    let mut ctx = context();

    // Resolves rather than rejects
    h.command.assert_view(&mut ctx, "footer", ".footer", &no_opts()).await.unwrap();

    let results = ctx.results().unwrap();
    assert_eq!(results.len(), 1);
    match results.get("footer") {
        Some(Outcome::Mismatch {
            diff_bounds,
            diff_clusters,
            tolerance,
            ..
        }) => {
            assert_eq!(*diff_bounds, Some(bounds));
            assert_eq!(diff_clusters, &clusters);
            assert_eq!(*tolerance, 2.3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [AssertViewEvent::MismatchFound { .. }]
    ));
}

#[tokio::test]
async fn duplicate_state_rejected_before_any_work() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(CompareResult::equal()));
    let mut ctx = context();

    h.command.assert_view(&mut ctx, "footer", ".footer", &no_opts()).await.unwrap();
    let before = ctx.results().unwrap().clone();

    let err = h
        .command
        .assert_view(&mut ctx, "footer", ".other", &no_opts())
        .await
        .unwrap_err();

    assert!(matches!(err, AssertViewError::DuplicateState { ref state_name } if state_name == "footer"));
    assert_eq!(ctx.results().unwrap(), &before);
    assert_eq!(h.capturer.captures.load(Ordering::SeqCst), 1);
    assert_eq!(h.capturer.prepared.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn state_names_are_case_sensitive() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(CompareResult::equal()));
    let mut ctx = context();

    h.command.assert_view(&mut ctx, "Footer", ".footer", &no_opts()).await.unwrap();
    h.command.assert_view(&mut ctx, "footer", ".footer", &no_opts()).await.unwrap();

    assert_eq!(ctx.results().unwrap().len(), 2);
}

#[tokio::test]
async fn distinct_states_each_recorded_once() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(CompareResult::equal()));
    h.create_reference("b");
    let mut ctx = context();

    for state in ["a", "b", "c", "d"] {
        h.command.assert_view(&mut ctx, state, ".x", &no_opts()).await.unwrap();
    }

    let results = ctx.results().unwrap();
    let names: Vec<_> = results.outcomes().iter().filter_map(Outcome::state_name).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
    assert_eq!(results.used_reference_paths().len(), 4);
    assert!(results.get("b").unwrap().is_success());
    assert!(results.verdict().is_err());
}

#[tokio::test]
async fn comparator_failure_propagates_but_path_is_recorded() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::failing());
    h.create_reference("header");
    let mut ctx = context();

    let err = h
        .command
        .assert_view(&mut ctx, "header", ".header", &no_opts())
        .await
        .unwrap_err();

    assert!(matches!(err, AssertViewError::Compare(_)));
    let results = ctx.results().unwrap();
    assert!(results.is_empty());
    assert_eq!(results.used_reference_paths(), &[h.reference("header")]);
}

#[tokio::test]
async fn capture_failure_propagates_before_reference_lookup() {
    let capturer = FakeCapturer {
        fail_capture: true,
        ..Default::default()
    };
    let h = Harness::new(capturer, FakeComparator::returning(CompareResult::equal()));
    let mut ctx = context();

    let err = h
        .command
        .assert_view(&mut ctx, "header", ".header", &no_opts())
        .await
        .unwrap_err();

    assert!(matches!(err, AssertViewError::Capture(_)));
    let results = ctx.results().unwrap();
    assert!(results.is_empty());
    assert!(results.used_reference_paths().is_empty());

    // The state was never recorded, so it may be asserted again
    assert!(!results.has_state("header"));
}

#[tokio::test]
async fn options_flow_to_collaborators() {
    let capturer = FakeCapturer {
        can_have_caret: true,
        ..Default::default()
    };
    let config = RunConfig {
        assert_view_opts: AssertViewOpts {
            ignore_elements: Some(".ads".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::with_config(capturer, FakeComparator::returning(CompareResult::equal()), config);
    h.create_reference("form");

    let mut ctx = context().with_opts(AssertViewOpts {
        tolerance: Some(4.0),
        antialiasing_tolerance: Some(1.5),
        ..Default::default()
    });
    let call = AssertViewOpts {
        tolerance: Some(6.0),
        allow_viewport_overflow: Some(true),
        ..Default::default()
    };

    h.command
        .assert_view(&mut ctx, "form", [".form", ".submit"], &call)
        .await
        .unwrap();

    let prepared = h.capturer.prepared.lock().unwrap();
    let (selectors, prepare_opts) = &prepared[0];
    assert_eq!(selectors, &vec![".form".to_string(), ".submit".to_string()]);
    assert_eq!(prepare_opts.ignore_selectors, vec![".ads".to_string()]);
    assert!(prepare_opts.allow_viewport_overflow);
    assert!(prepare_opts.capture_element_from_top);

    let requests = h.comparator.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.tolerance, 6.0);
    assert_eq!(request.antialiasing_tolerance, 1.5);
    assert!(request.can_have_caret);
    assert_eq!(request.pixel_ratio, 2.0);
    assert_eq!(request.reference, h.reference("form"));
    assert!(request.current.to_string_lossy().ends_with(".png"));
    assert!(Path::new(&request.current).exists());
}

#[tokio::test]
async fn comparator_meta_info_fills_reference_size() {
    let result = CompareResult {
        equal: true,
        meta_info: CompareMeta {
            reference_image: Some(ReferenceMeta {
                size: Some(ImageSize::new(4, 4)),
            }),
        },
        ..Default::default()
    };
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(result));
    h.create_reference("logo");
    let mut ctx = context();

    h.command.assert_view(&mut ctx, "logo", ".logo", &no_opts()).await.unwrap();

    match ctx.results().unwrap().get("logo") {
        Some(Outcome::Success { reference_image, .. }) => {
            assert_eq!(reference_image.size, Some(ImageSize::new(4, 4)));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn missing_reference_adopted_in_update_mode() {
    let config = RunConfig {
        update_refs: RefUpdateMode::Missing,
        ..Default::default()
    };
    let h = Harness::with_config(
        FakeCapturer::default(),
        FakeComparator::returning(CompareResult::equal()),
        config,
    );
    let mut rx = h.events.subscribe();
    let mut ctx = context();

    h.command.assert_view(&mut ctx, "header", ".header", &no_opts()).await.unwrap();

    assert!(matches!(
        ctx.results().unwrap().get("header"),
        Some(Outcome::Success { updated: true, .. })
    ));
    assert!(h.reference("header").exists());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [AssertViewEvent::ReferenceUpdated { .. }]
    ));
}

#[tokio::test]
async fn separate_tests_have_independent_results() {
    let h = Harness::new(FakeCapturer::default(), FakeComparator::returning(CompareResult::equal()));
    let mut first = context();
    let mut second = TestContext::new(TestIdentity::new("page footer", "specs/footer.yaml", "chromium"));

    h.command.assert_view(&mut first, "state", ".a", &no_opts()).await.unwrap();
    h.command.assert_view(&mut second, "state", ".a", &no_opts()).await.unwrap();

    assert_eq!(first.into_results().len(), 1);
    assert_eq!(second.into_results().len(), 1);
}
