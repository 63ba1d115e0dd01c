//! ViewCheck E2E runner
//!
//! Drives a browser through declarative YAML specs and runs `assert_view`
//! steps through the core assertion pipeline:
//! - Controls Playwright through a persistent JSON-lines driver
//! - Parses YAML test specs with per-test assertion defaults
//! - Renders diff images for mismatches and writes a JSON suite report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TestRunner<BrowserLauncher>                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_spec(spec)                                             │
//! │    ├── launcher.launch(viewport) -> BrowserPage             │
//! │    ├── TestContext::new(identity).with_opts(spec opts)      │
//! │    ├── for step in steps                                    │
//! │    │     ├── assert_view → AssertView::assert_view          │
//! │    │     └── otherwise   → BrowserPage::perform             │
//! │    ├── render diffs for mismatches                          │
//! │    └── ResultAggregator::verdict()                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (YAML)                                            │
//! │    ├── name, description, tags, viewport                    │
//! │    ├── assert_view_opts                                     │
//! │    └── steps: navigate | click | fill | type | press |      │
//! │               wait | sleep | hover | focus | evaluate |     │
//! │               log | assert_view { state, selectors }        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod playwright;
pub mod report;
pub mod runner;
pub mod spec;

pub use error::{E2eError, E2eResult};
pub use playwright::{Browser, BrowserLauncher, BrowserPage, PlaywrightConfig, PlaywrightDriver, PlaywrightLauncher};
pub use report::EventReporter;
pub use runner::{RunnerConfig, TestResult, TestRunner, TestSuiteResult};
pub use spec::{TestSpec, TestStep, Viewport};
