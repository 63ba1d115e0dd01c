//! ViewCheck core: visual-state assertions
//!
//! This crate ties screenshot capture, reference lookup and image comparison
//! together into a single assertion per named page state:
//! - Resolves layered assertion options before any I/O happens
//! - Captures the current state into a freshly allocated temp file
//! - Classifies the outcome (new baseline, match, mismatch)
//! - Records exactly one outcome per state into the test's result store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AssertView::assert_view(ctx, state, selectors, opts)       │
//! │    ├── resolve options (call-site > per-test > run-level)   │
//! │    ├── duplicate check against ctx.results                  │
//! │    ├── ScreenshotCapturer::prepare / capture                │
//! │    ├── TempAllocator::path + CapturedScreenshot::save       │
//! │    ├── ReferenceStore::resolve_path (recorded as "used")    │
//! │    ├── missing reference → NoRefImageHandler                │
//! │    └── ImageComparator::compare                             │
//! │          ├── equal     → Outcome::Success                   │
//! │          └── not equal → ImageDiffHandler                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  settle(): state errors are recorded, anything else is      │
//! │  returned to the caller                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod classify;
pub mod command;
pub mod compare;
pub mod config;
pub mod error;
pub mod events;
pub mod options;
pub mod reference;
pub mod results;
pub mod temp;
pub mod types;

pub use capture::{CaptureOpts, CapturedScreenshot, PrepareOpts, RgbaScreenshot, ScreenshotCapturer};
pub use classify::{ImageDiffHandler, NoRefImageHandler};
pub use command::{AssertView, TestContext};
pub use compare::{CompareOpts, CompareRequest, DiffRequest, ImageComparator, PixelComparator};
pub use config::{RefUpdateMode, RunConfig, TempConfig};
pub use error::{AssertViewError, AssertViewFailure, AssertViewResult, ErrorKind, ImageDiff, StateError};
pub use events::{AssertViewEvent, EventEmitter};
pub use options::{AssertViewOpts, MergedOptions};
pub use reference::{encode_name, PatternReferenceStore, ReferenceStore};
pub use results::{Outcome, ResultAggregator};
pub use temp::{TempAllocator, TempDirAllocator};
pub use types::*;

/// ViewCheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
