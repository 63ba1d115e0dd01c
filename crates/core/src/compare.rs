//! Image comparison interface and a simple pixel comparator

use async_trait::async_trait;
use image::{Pixel, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::{AssertViewError, AssertViewResult};
use crate::types::{CompareMeta, CompareResult, ImageSize, Rect, ReferenceMeta};

/// Comparator options taken verbatim from the run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOpts {
    /// Group differing pixels into clusters
    pub should_cluster: bool,
    /// Maximum distance (pixels) between two diff pixels of one cluster
    pub clusters_size: u32,
    /// Stop at the first differing pixel
    pub stop_on_first_fail: bool,
}

impl Default for CompareOpts {
    fn default() -> Self {
        Self {
            should_cluster: false,
            clusters_size: 10,
            stop_on_first_fail: false,
        }
    }
}

/// Everything the comparator needs for one comparison
#[derive(Debug, Clone, PartialEq)]
pub struct CompareRequest {
    pub reference: PathBuf,
    pub current: PathBuf,
    pub tolerance: f64,
    pub antialiasing_tolerance: f64,
    pub can_have_caret: bool,
    pub pixel_ratio: f64,
    pub compare_opts: CompareOpts,
}

/// Request to render a diff image for reporting
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRequest {
    pub reference: PathBuf,
    pub current: PathBuf,
    pub diff: PathBuf,
    pub tolerance: f64,
    pub antialiasing_tolerance: f64,
    /// Hex color, e.g. `#ff00ff`
    pub highlight_color: String,
}

/// Compares a reference image against the current one
#[async_trait]
pub trait ImageComparator: Send + Sync {
    async fn compare(&self, request: &CompareRequest) -> AssertViewResult<CompareResult>;

    /// Write an image highlighting the differing pixels
    async fn build_diff(&self, request: &DiffRequest) -> AssertViewResult<()>;
}

/// Per-channel tolerance comparator.
///
/// A pixel differs when any channel differs by more than `tolerance`.
/// Antialiasing is not detected; `antialiasing_tolerance` is accepted for
/// reporting only.
#[derive(Debug, Clone, Default)]
pub struct PixelComparator;

impl PixelComparator {
    pub fn new() -> Self {
        Self
    }

    fn compare_blocking(request: CompareRequest) -> AssertViewResult<CompareResult> {
        let reference_bytes = std::fs::read(&request.reference)?;
        let current_bytes = std::fs::read(&request.current)?;

        let reference = image::load_from_memory(&reference_bytes)?.to_rgba8();
        let reference_size = ImageSize::new(reference.width(), reference.height());
        let meta_info = CompareMeta {
            reference_image: Some(ReferenceMeta {
                size: Some(reference_size),
            }),
        };

        if hash_bytes(&reference_bytes) == hash_bytes(&current_bytes) {
            debug!("Screenshots match exactly (same hash)");
            return Ok(CompareResult {
                equal: true,
                meta_info,
                ..Default::default()
            });
        }

        let current = image::load_from_memory(&current_bytes)?.to_rgba8();

        if reference.dimensions() != current.dimensions() {
            warn!(
                "Screenshot dimensions differ: reference {:?} vs current {:?}",
                reference.dimensions(),
                current.dimensions()
            );
            let width = reference.width().max(current.width());
            let height = reference.height().max(current.height());
            let bounds = Rect::new(0.0, 0.0, (width - 1) as f64, (height - 1) as f64);
            return Ok(CompareResult {
                equal: false,
                diff_bounds: Some(bounds),
                diff_clusters: vec![bounds],
                meta_info,
            });
        }

        let diff_pixels = differing_pixels(&reference, &current, &request);
        let Some(bounds) = bounding_rect(&diff_pixels) else {
            return Ok(CompareResult {
                equal: true,
                meta_info,
                ..Default::default()
            });
        };

        // A lone caret column does not count as a difference
        if request.can_have_caret && bounds.width() < caret_width(&request) {
            debug!("Ignoring caret-sized difference at {:?}", bounds);
            return Ok(CompareResult {
                equal: true,
                meta_info,
                ..Default::default()
            });
        }

        let diff_clusters = if request.compare_opts.should_cluster {
            cluster(&diff_pixels, request.compare_opts.clusters_size as f64)
        } else {
            vec![bounds]
        };

        Ok(CompareResult {
            equal: false,
            diff_bounds: Some(bounds),
            diff_clusters,
            meta_info,
        })
    }

    fn build_diff_blocking(request: DiffRequest) -> AssertViewResult<()> {
        let reference = image::open(&request.reference)?.to_rgba8();
        let current = image::open(&request.current)?.to_rgba8();
        let highlight = parse_hex_color(&request.highlight_color)?;

        let width = reference.width().max(current.width());
        let height = reference.height().max(current.height());
        let mut diff = RgbaImage::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let pixel = match (pixel_at(&reference, x, y), pixel_at(&current, x, y)) {
                    (Some(r), Some(c)) if !pixels_differ(r, c, request.tolerance) => {
                        // Keep original but dim it
                        let channels = c.channels();
                        Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128])
                    }
                    _ => highlight,
                };
                diff.put_pixel(x, y, pixel);
            }
        }

        if let Some(parent) = request.diff.parent() {
            std::fs::create_dir_all(parent)?;
        }
        diff.save_with_format(&request.diff, image::ImageFormat::Png)?;
        Ok(())
    }
}

#[async_trait]
impl ImageComparator for PixelComparator {
    async fn compare(&self, request: &CompareRequest) -> AssertViewResult<CompareResult> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || Self::compare_blocking(request))
            .await
            .map_err(|e| AssertViewError::Compare(format!("comparison task failed: {}", e)))?
    }

    async fn build_diff(&self, request: &DiffRequest) -> AssertViewResult<()> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || Self::build_diff_blocking(request))
            .await
            .map_err(|e| AssertViewError::Compare(format!("diff task failed: {}", e)))?
    }
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn pixel_at(image: &RgbaImage, x: u32, y: u32) -> Option<&Rgba<u8>> {
    (x < image.width() && y < image.height()).then(|| image.get_pixel(x, y))
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: f64) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as f64 - *y as f64).abs() > tolerance)
}

/// Pixels of `current` that differ from `reference`.
///
/// With `stop_on_first_fail` the scan ends at the first difference that can
/// not be part of a caret column, so a partial list is never mistaken for one.
fn differing_pixels(reference: &RgbaImage, current: &RgbaImage, request: &CompareRequest) -> Vec<(u32, u32)> {
    let caret_width = caret_width(request);
    let mut diff = Vec::new();
    let mut columns: Option<(u32, u32)> = None;

    for (x, y, pixel) in current.enumerate_pixels() {
        if !pixels_differ(reference.get_pixel(x, y), pixel, request.tolerance) {
            continue;
        }
        diff.push((x, y));

        let (min_x, max_x) = columns.map_or((x, x), |(lo, hi)| (lo.min(x), hi.max(x)));
        columns = Some((min_x, max_x));

        if request.compare_opts.stop_on_first_fail
            && (!request.can_have_caret || f64::from(max_x - min_x) >= caret_width)
        {
            break;
        }
    }
    diff
}

/// Widest difference, in device pixels, still treated as a text caret
fn caret_width(request: &CompareRequest) -> f64 {
    request.pixel_ratio.max(1.0).ceil()
}

fn bounding_rect(pixels: &[(u32, u32)]) -> Option<Rect> {
    let (first, rest) = pixels.split_first()?;
    let mut bounds = Rect::point(first.0 as f64, first.1 as f64);
    for (x, y) in rest {
        bounds.extend(&Rect::point(*x as f64, *y as f64));
    }
    Some(bounds)
}

/// Group diff pixels into rectangles no further than `distance` apart
fn cluster(pixels: &[(u32, u32)], distance: f64) -> Vec<Rect> {
    let mut clusters: Vec<Rect> = Vec::new();
    for (x, y) in pixels {
        let point = Rect::point(*x as f64, *y as f64);
        match clusters.iter_mut().find(|c| c.is_near(&point, distance)) {
            Some(c) => c.extend(&point),
            None => clusters.push(point),
        }
    }

    // Growing clusters may now touch each other
    let mut merged: Vec<Rect> = Vec::new();
    for c in clusters {
        match merged.iter_mut().find(|m| m.is_near(&c, distance)) {
            Some(m) => m.extend(&c),
            None => merged.push(c),
        }
    }
    merged
}

fn parse_hex_color(color: &str) -> AssertViewResult<Rgba<u8>> {
    let hex_part = color.trim_start_matches('#');
    let bytes = hex::decode(hex_part)
        .ok()
        .filter(|b| b.len() == 3)
        .ok_or_else(|| AssertViewError::InvalidConfig(format!("invalid diff color: {}", color)))?;
    Ok(Rgba([bytes[0], bytes[1], bytes[2], 255]))
}
