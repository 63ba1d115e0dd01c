//! Runner behaviour against an in-process fake browser

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use viewcheck_core::{
    AssertViewError, AssertViewResult, CaptureOpts, CapturedScreenshot, Outcome, PageInfo, PrepareOpts, Rect,
    RefUpdateMode, RgbaScreenshot, RunConfig, ScreenshotCapturer, TempConfig,
};
use viewcheck_e2e::{
    BrowserLauncher, BrowserPage, E2eError, E2eResult, RunnerConfig, TestRunner, TestSpec, TestStep, Viewport,
};

/// State shared between the launcher and every page it opens
#[derive(Default)]
struct Browser {
    color: Mutex<[u8; 4]>,
    performed: Mutex<Vec<String>>,
    launched: Mutex<Vec<Viewport>>,
}

struct FakeLauncher(Arc<Browser>);

struct FakePage(Arc<Browser>);

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    type Page = FakePage;

    async fn launch(&self, viewport: Viewport) -> E2eResult<FakePage> {
        self.0.launched.lock().unwrap().push(viewport);
        Ok(FakePage(self.0.clone()))
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn perform(&self, step: &TestStep) -> E2eResult<()> {
        if let TestStep::Click { selector, .. } = step {
            if selector == ".broken" {
                return Err(E2eError::Playwright("element not found".into()));
            }
        }
        self.0.performed.lock().unwrap().push(step.label());
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ScreenshotCapturer for FakePage {
    async fn prepare(&self, selectors: &[String], _opts: &PrepareOpts) -> AssertViewResult<PageInfo> {
        if selectors.iter().any(|s| s == ".missing") {
            return Err(AssertViewError::Capture("could not find element".into()));
        }
        Ok(PageInfo {
            capture_area: Rect::new(0.0, 0.0, 8.0, 8.0),
            ignore_areas: vec![],
            viewport: Rect::new(0.0, 0.0, 1280.0, 720.0),
            pixel_ratio: 1.0,
            can_have_caret: false,
        })
    }

    async fn capture(&self, _page: &PageInfo, _opts: &CaptureOpts) -> AssertViewResult<Box<dyn CapturedScreenshot>> {
        let color = *self.0.color.lock().unwrap();
        Ok(Box::new(RgbaScreenshot::new(RgbaImage::from_pixel(8, 8, Rgba(color)))))
    }
}

struct Setup {
    dir: TempDir,
    browser: Arc<Browser>,
}

impl Setup {
    fn new() -> Self {
        let browser = Arc::new(Browser::default());
        *browser.color.lock().unwrap() = [255, 255, 255, 255];
        Self {
            dir: tempfile::tempdir().unwrap(),
            browser,
        }
    }

    fn runner(&self, update_refs: RefUpdateMode) -> TestRunner<FakeLauncher> {
        let run = RunConfig {
            screenshots_path: format!("{}/screens/{{test_id}}/{{browser}}/{{state}}.png", self.dir.path().display()),
            update_refs,
            temp: TempConfig {
                dir: Some(self.dir.path().join("tmp")),
                ..Default::default()
            },
            ..Default::default()
        };
        let config = RunnerConfig {
            run,
            specs_dir: self.dir.path().join("specs"),
            output_dir: self.dir.path().join("out"),
        };
        TestRunner::new(config, FakeLauncher(self.browser.clone())).unwrap()
    }

    fn paint(&self, color: [u8; 4]) {
        *self.browser.color.lock().unwrap() = color;
    }

    fn write_spec(&self, file: &str, yaml: &str) {
        let dir = self.dir.path().join("specs");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), yaml).unwrap();
    }
}

const HEADER_SPEC: &str = r#"
name: header
tags: [smoke]
viewport:
  width: 800
  height: 600
steps:
  - action: navigate
    url: /
  - action: assert_view
    state: plain
    selectors: header
  - action: hover
    selector: header .menu
  - action: assert_view
    state: hovered
    selectors: [header, .dropdown]
"#;

fn spec(yaml: &str) -> TestSpec {
    TestSpec::from_yaml(yaml).unwrap()
}

#[tokio::test]
async fn first_run_records_new_baselines() {
    let setup = Setup::new();
    let runner = setup.runner(RefUpdateMode::None);

    let result = runner.run_spec(&spec(HEADER_SPEC)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.steps.len(), 4);
    assert!(result.steps.iter().all(|s| s.success));
    assert_eq!(result.assertions.len(), 2);
    assert!(result
        .assertions
        .outcomes()
        .iter()
        .all(|o| matches!(o, Outcome::NewBaseline { .. })));

    let error = result.error.unwrap();
    assert!(error.contains("\"plain\""));
    assert!(error.contains("\"hovered\""));

    assert_eq!(
        *setup.browser.performed.lock().unwrap(),
        vec!["navigate:/".to_string(), "hover:header .menu".to_string()]
    );
    assert_eq!(
        setup.browser.launched.lock().unwrap()[0],
        Viewport {
            width: 800,
            height: 600
        }
    );
}

#[tokio::test]
async fn adopted_references_pass_and_changes_render_diffs() {
    let setup = Setup::new();

    let adopted = setup.runner(RefUpdateMode::Missing).run_spec(&spec(HEADER_SPEC)).await.unwrap();
    assert!(adopted.success, "{:?}", adopted.error);
    for path in adopted.assertions.used_reference_paths() {
        assert!(path.exists(), "missing reference {}", path.display());
    }

    let unchanged = setup.runner(RefUpdateMode::None).run_spec(&spec(HEADER_SPEC)).await.unwrap();
    assert!(unchanged.success, "{:?}", unchanged.error);
    assert!(unchanged.diff_images.is_empty());

    setup.paint([0, 0, 0, 255]);
    let runner = setup.runner(RefUpdateMode::None);
    let changed = runner.run_spec(&spec(HEADER_SPEC)).await.unwrap();
    assert!(!changed.success);
    assert!(matches!(
        changed.assertions.get("plain"),
        Some(Outcome::Mismatch { diff_bounds: Some(_), .. })
    ));

    assert_eq!(changed.diff_images.len(), 2);
    let expected = setup
        .dir
        .path()
        .join("out/diffs")
        .join(&changed.test_id)
        .join("plain.png");
    assert_eq!(changed.diff_images[0].path, expected);
    assert!(expected.exists());
}

#[tokio::test]
async fn duplicate_state_stops_the_test() {
    let setup = Setup::new();
    let runner = setup.runner(RefUpdateMode::Missing);
    let yaml = r#"
name: dup
steps:
  - action: assert_view
    state: same
    selectors: .a
  - action: assert_view
    state: same
    selectors: .b
  - action: log
    message: never reached
"#;

    let result = runner.run_spec(&spec(yaml)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    assert!(!result.steps[1].success);
    assert!(result.error.unwrap().contains("duplicate name for \"same\" state"));
    assert_eq!(result.assertions.len(), 1);
}

#[tokio::test]
async fn infrastructure_failure_is_reported_as_unexpected() {
    let setup = Setup::new();
    let runner = setup.runner(RefUpdateMode::None);
    let yaml = r#"
name: missing-element
steps:
  - action: assert_view
    state: ghost
    selectors: .missing
"#;

    let result = runner.run_spec(&spec(yaml)).await.unwrap();

    assert!(!result.success);
    assert!(matches!(
        result.assertions.outcomes(),
        [Outcome::UnexpectedFailure { .. }]
    ));
    assert!(result.assertions.used_reference_paths().is_empty());
}

#[tokio::test]
async fn failing_step_skips_the_rest() {
    let setup = Setup::new();
    let runner = setup.runner(RefUpdateMode::None);
    let yaml = r#"
name: broken-click
steps:
  - action: click
    selector: .broken
  - action: assert_view
    state: after
    selectors: body
"#;

    let result = runner.run_spec(&spec(yaml)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.steps.len(), 1);
    assert!(result.error.unwrap().starts_with("click:.broken"));
    assert!(result.assertions.is_empty());
}

#[tokio::test]
async fn suite_report_written_for_tagged_run() {
    let setup = Setup::new();
    setup.write_spec("header.yaml", HEADER_SPEC);
    setup.write_spec(
        "footer.yaml",
        "name: footer\nsteps:\n  - action: assert_view\n    state: footer\n    selectors: footer\n",
    );
    let runner = setup.runner(RefUpdateMode::Missing);

    let suite = runner.run_tagged("smoke").await.unwrap();
    assert_eq!(suite.total, 1);
    assert_eq!(suite.passed, 1);
    assert!(suite.success());

    let all = runner.run_all().await.unwrap();
    assert_eq!(all.total, 2);

    let path = runner.write_results(&all).unwrap();
    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report["total"], 2);
    assert_eq!(report["browser_id"], "chromium");
    assert!(report["started_at"].is_string());
    assert!(Path::new(&path).ends_with("test-results.json"));
}

#[tokio::test]
async fn unknown_test_name_is_an_error() {
    let setup = Setup::new();
    setup.write_spec("header.yaml", HEADER_SPEC);
    let runner = setup.runner(RefUpdateMode::None);

    assert!(matches!(
        runner.run_test("nope").await,
        Err(E2eError::TestNotFound(_))
    ));
}
