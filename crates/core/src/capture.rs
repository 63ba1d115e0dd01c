//! Screenshot capture interface

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::time::Duration;

use crate::error::{AssertViewError, AssertViewResult};
use crate::types::{ImageSize, PageInfo, Rect};

/// Options for preparing the page before capture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrepareOpts {
    pub ignore_selectors: Vec<String>,
    pub allow_viewport_overflow: bool,
    pub capture_element_from_top: bool,
}

/// Options for taking the screenshot itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureOpts {
    pub allow_viewport_overflow: bool,
    pub composite_image: bool,
    pub screenshot_delay: Duration,
}

/// Prepares a page or element and produces a capturable image
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    /// Locate the selectors, scroll as requested, and report page geometry
    async fn prepare(&self, selectors: &[String], opts: &PrepareOpts) -> AssertViewResult<PageInfo>;

    /// Capture the prepared area
    async fn capture(&self, page: &PageInfo, opts: &CaptureOpts) -> AssertViewResult<Box<dyn CapturedScreenshot>>;
}

/// An image produced by [`ScreenshotCapturer::capture`]
#[async_trait]
pub trait CapturedScreenshot: Send + Sync {
    fn size(&self) -> ImageSize;

    async fn save(&self, path: &Path) -> AssertViewResult<()>;
}

/// In-memory RGBA screenshot
#[derive(Debug, Clone)]
pub struct RgbaScreenshot {
    image: RgbaImage,
}

impl RgbaScreenshot {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Decode a PNG (or any format `image` understands) from memory
    pub fn from_bytes(data: &[u8]) -> AssertViewResult<Self> {
        let image = image::load_from_memory(data)?.to_rgba8();
        Ok(Self { image })
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Crop to `area`, given in device pixels; the area is clamped to the image
    pub fn crop(&mut self, area: &Rect) -> AssertViewResult<()> {
        let (width, height) = self.image.dimensions();
        let left = area.left.max(0.0).round() as u32;
        let top = area.top.max(0.0).round() as u32;
        let right = (area.right.round() as u32).min(width);
        let bottom = (area.bottom.round() as u32).min(height);

        if left >= right || top >= bottom {
            return Err(AssertViewError::Capture(format!(
                "capture area {:?} is outside of the {}x{} screenshot",
                area, width, height
            )));
        }

        self.image = image::imageops::crop_imm(&self.image, left, top, right - left, bottom - top).to_image();
        Ok(())
    }

    /// Paint `areas` (device pixels, relative to this image) solid black
    pub fn clear_areas(&mut self, areas: &[Rect]) {
        let (width, height) = self.image.dimensions();
        for area in areas {
            let left = area.left.max(0.0).floor() as u32;
            let top = area.top.max(0.0).floor() as u32;
            let right = (area.right.max(0.0).ceil() as u32).min(width);
            let bottom = (area.bottom.max(0.0).ceil() as u32).min(height);
            for y in top..bottom {
                for x in left..right {
                    self.image.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
    }
}

#[async_trait]
impl CapturedScreenshot for RgbaScreenshot {
    fn size(&self) -> ImageSize {
        ImageSize::new(self.image.width(), self.image.height())
    }

    async fn save(&self, path: &Path) -> AssertViewResult<()> {
        let image = self.image.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || image.save_with_format(&path, image::ImageFormat::Png))
            .await
            .map_err(|e| AssertViewError::Capture(format!("save task failed: {}", e)))??;
        Ok(())
    }
}
