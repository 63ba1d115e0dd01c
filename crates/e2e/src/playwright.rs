//! Playwright browser automation
//!
//! A single `node` process per test keeps the browser page alive between
//! steps. Requests and responses are JSON objects, one per line, matched by id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use viewcheck_core::{
    AssertViewError, AssertViewResult, CaptureOpts, CapturedScreenshot, PageInfo, PrepareOpts, Rect,
    RgbaScreenshot, ScreenshotCapturer,
};

use crate::error::{E2eError, E2eResult};
use crate::spec::{TestStep, Viewport, WaitState};

/// Driver script run by `node`; launch options arrive as the first argument
const DRIVER_JS: &str = r#"
const readline = require('readline');
const playwright = require(require.resolve('playwright', { paths: [process.cwd()] }));

function prepareArea(req) {
  const toDocument = (r) => ({
    top: r.top + window.scrollY,
    left: r.left + window.scrollX,
    right: r.right + window.scrollX,
    bottom: r.bottom + window.scrollY,
  });
  const visible = (r) => r.right > r.left && r.bottom > r.top;
  const union = (rects) => rects.reduce((a, r) => ({
    top: Math.min(a.top, r.top),
    left: Math.min(a.left, r.left),
    right: Math.max(a.right, r.right),
    bottom: Math.max(a.bottom, r.bottom),
  }));

  const found = req.selectors
    .map((s) => document.querySelector(s))
    .filter(Boolean)
    .map((el) => toDocument(el.getBoundingClientRect()))
    .filter(visible);
  if (found.length === 0) {
    throw new Error('could not find element with selectors: ' + req.selectors.join(', '));
  }
  const area = union(found);

  const outside = area.top < window.scrollY || area.bottom > window.scrollY + window.innerHeight;
  if (req.capture_element_from_top && outside) {
    window.scrollTo(window.scrollX, area.top);
  }

  const ignoreAreas = req.ignore_selectors
    .flatMap((s) => Array.from(document.querySelectorAll(s)))
    .map((el) => toDocument(el.getBoundingClientRect()))
    .filter(visible);

  const active = document.activeElement;
  const canHaveCaret = !!active && (active.isContentEditable || /^(input|textarea)$/i.test(active.tagName));

  return {
    captureArea: area,
    ignoreAreas,
    viewport: {
      top: window.scrollY,
      left: window.scrollX,
      right: window.scrollX + window.innerWidth,
      bottom: window.scrollY + window.innerHeight,
    },
    pixelRatio: window.devicePixelRatio,
    canHaveCaret,
  };
}

(async () => {
  const config = JSON.parse(process.argv[2]);
  const browser = await playwright[config.browser].launch({ headless: config.headless });
  const context = await browser.newContext({ viewport: config.viewport });
  const page = await context.newPage();
  const resolveUrl = (url) => (/^[a-z]+:/i.test(url) ? url : config.base_url + url);

  const handlers = {
    goto: async (req) => {
      await page.goto(resolveUrl(req.url));
      if (req.wait_for_selector) await page.waitForSelector(req.wait_for_selector);
    },
    click: (req) => page.click(req.selector, { timeout: req.timeout_ms }),
    fill: (req) => page.fill(req.selector, req.value),
    type: (req) => page.type(req.selector, req.text, { delay: req.delay_ms }),
    press: (req) => (req.selector ? page.locator(req.selector).press(req.key) : page.keyboard.press(req.key)),
    wait: (req) => page.waitForSelector(req.selector, { state: req.state, timeout: req.timeout_ms }),
    hover: (req) => page.hover(req.selector),
    focus: (req) => page.focus(req.selector),
    evaluate: (req) => page.evaluate('(() => {' + req.script + '})()'),
    prepare: (req) => page.evaluate(prepareArea, req),
    screenshot: (req) => page.screenshot({ path: req.path, fullPage: req.full_page }),
    close: () => browser.close(),
  };

  const reply = (response) => process.stdout.write(JSON.stringify(response) + '\n');
  reply({ id: 0, ok: true, result: 'ready' });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    const req = JSON.parse(line);
    try {
      const handler = handlers[req.cmd];
      if (!handler) throw new Error('unknown command: ' + req.cmd);
      const result = await handler(req);
      reply({ id: req.id, ok: true, result: result === undefined ? null : result });
    } catch (error) {
      reply({ id: req.id, ok: false, error: error.message });
    }
    if (req.cmd === 'close') break;
  }
  process.exit(0);
})().catch((error) => {
  process.stdout.write(JSON.stringify({ id: 0, ok: false, error: error.message }) + '\n');
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    /// `node` executable
    pub node: PathBuf,
    /// Directory whose `node_modules` provides `playwright`
    pub working_dir: PathBuf,
    /// Longest time to wait for one driver response
    pub command_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            browser: Browser::Chromium,
            headless: true,
            node: PathBuf::from("node"),
            working_dir: PathBuf::from("."),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// A live browser page that can run test steps and capture screenshots
#[async_trait]
pub trait BrowserPage: ScreenshotCapturer {
    /// Run a non-assertion step
    async fn perform(&self, step: &TestStep) -> E2eResult<()>;

    async fn close(&self) -> E2eResult<()>;
}

/// Opens one page per test
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Page: BrowserPage + 'static;

    async fn launch(&self, viewport: Viewport) -> E2eResult<Self::Page>;
}

/// Launches [`PlaywrightDriver`]s
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub async fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        check_playwright_installed(&config).await?;
        Ok(Self { config })
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    type Page = PlaywrightDriver;

    async fn launch(&self, viewport: Viewport) -> E2eResult<PlaywrightDriver> {
        PlaywrightDriver::launch(&self.config, viewport).await
    }
}

/// Check if Playwright can be loaded by node
async fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
    let status = Command::new(&config.node)
        .args(["-e", "require(require.resolve('playwright', { paths: [process.cwd()] }))"])
        .current_dir(&config.working_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(E2eError::PlaywrightNotFound),
    }
}

#[derive(Debug, Serialize)]
struct LaunchOptions<'a> {
    browser: &'a str,
    headless: bool,
    base_url: &'a str,
    viewport: Viewport,
}

/// One driver request
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Goto {
        url: &'a str,
        wait_for_selector: Option<&'a str>,
    },
    Click {
        selector: &'a str,
        timeout_ms: u64,
    },
    Fill {
        selector: &'a str,
        value: &'a str,
    },
    Type {
        selector: &'a str,
        text: &'a str,
        delay_ms: u64,
    },
    Press {
        selector: Option<&'a str>,
        key: &'a str,
    },
    Wait {
        selector: &'a str,
        timeout_ms: u64,
        state: WaitState,
    },
    Hover {
        selector: &'a str,
    },
    Focus {
        selector: &'a str,
    },
    Evaluate {
        script: &'a str,
    },
    Prepare {
        selectors: &'a [String],
        ignore_selectors: &'a [String],
        capture_element_from_top: bool,
    },
    Screenshot {
        path: &'a Path,
        full_page: bool,
    },
    Close,
}

/// Extra time granted on top of a step's own timeout for the driver round trip
const STEP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

impl DriverCommand<'_> {
    /// Time the page itself may spend on this command
    fn step_timeout(&self) -> Option<Duration> {
        match self {
            DriverCommand::Click { timeout_ms, .. } | DriverCommand::Wait { timeout_ms, .. } => {
                Some(Duration::from_millis(*timeout_ms))
            }
            DriverCommand::Type { text, delay_ms, .. } => {
                Some(Duration::from_millis(delay_ms.saturating_mul(text.chars().count() as u64)))
            }
            _ => None,
        }
    }

    /// How long to wait for the driver's answer
    fn response_timeout(&self, command_timeout: Duration) -> Duration {
        match self.step_timeout() {
            Some(step) => command_timeout.max(step + STEP_TIMEOUT_MARGIN),
            None => command_timeout,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DriverCommand::Goto { .. } => "goto",
            DriverCommand::Click { .. } => "click",
            DriverCommand::Fill { .. } => "fill",
            DriverCommand::Type { .. } => "type",
            DriverCommand::Press { .. } => "press",
            DriverCommand::Wait { .. } => "wait",
            DriverCommand::Hover { .. } => "hover",
            DriverCommand::Focus { .. } => "focus",
            DriverCommand::Evaluate { .. } => "evaluate",
            DriverCommand::Prepare { .. } => "prepare",
            DriverCommand::Screenshot { .. } => "screenshot",
            DriverCommand::Close => "close",
        }
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    command: &'a DriverCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

struct DriverIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

/// Playwright page driven over a persistent `node` process
pub struct PlaywrightDriver {
    io: Mutex<DriverIo>,
    child: Mutex<Child>,
    /// Holds the driver script and raw screenshots
    scratch: TempDir,
    command_timeout: Duration,
}

impl PlaywrightDriver {
    /// Start the driver and wait until the browser page is ready
    pub async fn launch(config: &PlaywrightConfig, viewport: Viewport) -> E2eResult<Self> {
        let scratch = tempfile::Builder::new().prefix("viewcheck-driver-").tempdir()?;
        let script_path = scratch.path().join("driver.js");
        tokio::fs::write(&script_path, DRIVER_JS).await?;

        let options = serde_json::to_string(&LaunchOptions {
            browser: config.browser.as_str(),
            headless: config.headless,
            base_url: &config.base_url,
            viewport,
        })?;

        debug!("Starting Playwright driver: {}", script_path.display());

        let mut child = Command::new(&config.node)
            .arg(&script_path)
            .arg(options)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdout unavailable".to_string()))?;

        let driver = Self {
            io: Mutex::new(DriverIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 1,
            }),
            child: Mutex::new(child),
            scratch,
            command_timeout: config.command_timeout,
        };

        // Browser launch can take a while on a cold cache
        {
            let mut io = driver.io.lock().await;
            let ready = driver.read_response(&mut io, "launch", 0, driver.command_timeout * 2).await?;
            debug!("Playwright driver ready: {}", ready);
        }

        info!(
            "Launched {} ({}x{})",
            config.browser.as_str(),
            viewport.width,
            viewport.height
        );
        Ok(driver)
    }

    async fn request(&self, command: &DriverCommand<'_>) -> E2eResult<serde_json::Value> {
        let mut io = self.io.lock().await;
        let id = io.next_id;
        io.next_id += 1;

        let mut line = serde_json::to_string(&Request { id, command })?;
        line.push('\n');
        debug!("Driver request: {}", line.trim_end());

        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        let timeout = command.response_timeout(self.command_timeout);
        self.read_response(&mut io, command.name(), id, timeout).await
    }

    async fn read_response(
        &self,
        io: &mut DriverIo,
        name: &str,
        id: u64,
        timeout: Duration,
    ) -> E2eResult<serde_json::Value> {
        let response = tokio::time::timeout(timeout, next_response(io, name, id))
            .await
            .map_err(|_| E2eError::Playwright(format!("no answer to '{}' within {:?}", name, timeout)))??;

        if !response.ok {
            return Err(E2eError::Playwright(format!(
                "{}: {}",
                name,
                response.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        Ok(response.result)
    }

    async fn take_screenshot(&self, full_page: bool) -> E2eResult<RgbaScreenshot> {
        let file = tempfile::Builder::new()
            .prefix("shot-")
            .suffix(".png")
            .tempfile_in(self.scratch.path())?
            .into_temp_path();

        self.request(&DriverCommand::Screenshot {
            path: &file,
            full_page,
        })
        .await?;

        let bytes = tokio::fs::read(&file).await?;
        Ok(RgbaScreenshot::from_bytes(&bytes)?)
    }
}

#[async_trait]
impl BrowserPage for PlaywrightDriver {
    async fn perform(&self, step: &TestStep) -> E2eResult<()> {
        let command = match step {
            TestStep::Navigate { url, wait_for_selector } => DriverCommand::Goto {
                url,
                wait_for_selector: wait_for_selector.as_deref(),
            },
            TestStep::Click { selector, timeout_ms } => DriverCommand::Click {
                selector,
                timeout_ms: timeout_ms.unwrap_or(5000),
            },
            TestStep::Fill { selector, value } => DriverCommand::Fill { selector, value },
            TestStep::Type {
                selector,
                text,
                delay_ms,
            } => DriverCommand::Type {
                selector,
                text,
                delay_ms: delay_ms.unwrap_or(50),
            },
            TestStep::Press { selector, key } => DriverCommand::Press {
                selector: selector.as_deref(),
                key,
            },
            TestStep::Wait {
                selector,
                timeout_ms,
                state,
            } => DriverCommand::Wait {
                selector,
                timeout_ms: *timeout_ms,
                state: *state,
            },
            TestStep::Hover { selector } => DriverCommand::Hover { selector },
            TestStep::Focus { selector } => DriverCommand::Focus { selector },
            TestStep::Evaluate { script, expected } => {
                let result = self.request(&DriverCommand::Evaluate { script }).await?;
                return match expected {
                    Some(expected) if *expected != result => Err(E2eError::StepFailed {
                        step: step.label(),
                        reason: format!("expected {}, got {}", expected, result),
                    }),
                    _ => Ok(()),
                };
            }
            TestStep::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                return Ok(());
            }
            TestStep::Log { message } => {
                info!("[TEST LOG] {}", message);
                return Ok(());
            }
            TestStep::AssertView { .. } => {
                return Err(E2eError::StepFailed {
                    step: step.label(),
                    reason: "visual assertions are run by the test runner".to_string(),
                });
            }
        };

        self.request(&command).await?;
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        if let Err(e) = self.request(&DriverCommand::Close).await {
            warn!("Driver did not close cleanly: {}", e);
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                debug!("Driver exited: {:?}", status?);
            }
            Err(_) => {
                warn!("Driver still running after close, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ScreenshotCapturer for PlaywrightDriver {
    async fn prepare(&self, selectors: &[String], opts: &PrepareOpts) -> AssertViewResult<PageInfo> {
        let result = self
            .request(&DriverCommand::Prepare {
                selectors,
                ignore_selectors: &opts.ignore_selectors,
                capture_element_from_top: opts.capture_element_from_top,
            })
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn capture(&self, page: &PageInfo, opts: &CaptureOpts) -> AssertViewResult<Box<dyn CapturedScreenshot>> {
        check_viewport_overflow(page, opts)?;

        if !opts.screenshot_delay.is_zero() {
            debug!("Waiting {:?} before screenshot", opts.screenshot_delay);
            tokio::time::sleep(opts.screenshot_delay).await;
        }

        let mut shot = self.take_screenshot(opts.composite_image).await?;
        let (area, ignore) = device_areas(page, opts.composite_image);
        shot.crop(&area)?;
        shot.clear_areas(&ignore);
        Ok(Box::new(shot))
    }
}

fn contains(outer: &Rect, inner: &Rect) -> bool {
    inner.top >= outer.top && inner.left >= outer.left && inner.right <= outer.right && inner.bottom <= outer.bottom
}

/// A viewport screenshot can only show what is inside the viewport
fn check_viewport_overflow(page: &PageInfo, opts: &CaptureOpts) -> AssertViewResult<()> {
    if opts.composite_image || opts.allow_viewport_overflow || contains(&page.viewport, &page.capture_area) {
        return Ok(());
    }
    Err(AssertViewError::Capture(format!(
        "can not capture area {:?} outside of viewport {:?}; enable allow_viewport_overflow or composite_image",
        page.capture_area, page.viewport
    )))
}

/// Capture and ignore areas in screenshot pixels.
///
/// Full-page screenshots start at the document origin, viewport screenshots
/// at the viewport's top-left corner. Ignore areas are made relative to the
/// cropped image.
fn device_areas(page: &PageInfo, full_page: bool) -> (Rect, Vec<Rect>) {
    let ratio = page.pixel_ratio.max(1.0);
    let (origin_top, origin_left) = if full_page {
        (0.0, 0.0)
    } else {
        (page.viewport.top, page.viewport.left)
    };

    let to_device = |r: &Rect, top: f64, left: f64| {
        Rect::new(
            (r.top - top) * ratio,
            (r.left - left) * ratio,
            (r.right - left) * ratio,
            (r.bottom - top) * ratio,
        )
    };

    let area = to_device(&page.capture_area, origin_top, origin_left);
    let crop_top = area.top.max(0.0) / ratio + origin_top;
    let crop_left = area.left.max(0.0) / ratio + origin_left;
    let ignore = page
        .ignore_areas
        .iter()
        .map(|r| to_device(r, crop_top, crop_left))
        .collect();

    (area, ignore)
}

/// Read driver lines until the answer to request `id` arrives
async fn next_response(io: &mut DriverIo, name: &str, id: u64) -> E2eResult<Response> {
    loop {
        let line = io.stdout.next_line().await?.ok_or(E2eError::DriverClosed)?;
        let response: Response = serde_json::from_str(&line)?;
        if let Some(response) = accept_response(name, id, response)? {
            return Ok(response);
        }
    }
}

/// Late answers to earlier, timed-out requests are dropped
fn accept_response(name: &str, id: u64, response: Response) -> E2eResult<Option<Response>> {
    if response.id < id {
        warn!("Discarding late driver response {} while waiting for {} ('{}')", response.id, id, name);
        return Ok(None);
    }
    if response.id > id {
        return Err(E2eError::Playwright(format!(
            "expected response {} to '{}', got {}",
            id, name, response.id
        )));
    }
    Ok(Some(response))
}
