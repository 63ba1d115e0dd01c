//! Shared data types for the assertion pipeline

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Width and height of an image in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle with inclusive edges.
///
/// Used both for page geometry reported by the capturer and for the
/// diff bounds/clusters reported by the comparator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, right: f64, bottom: f64) -> Self {
        Self { top, left, right, bottom }
    }

    /// Rectangle covering a single point
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(y, x, x, y)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Grow this rectangle to include `other`
    pub fn extend(&mut self, other: &Rect) {
        self.top = self.top.min(other.top);
        self.left = self.left.min(other.left);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.max(other.bottom);
    }

    /// Whether `other` lies within `distance` of this rectangle
    pub fn is_near(&self, other: &Rect, distance: f64) -> bool {
        other.left <= self.right + distance
            && other.right >= self.left - distance
            && other.top <= self.bottom + distance
            && other.bottom >= self.top - distance
    }
}

/// A list of CSS selectors.
///
/// Deserializes from either a single string or a sequence of strings, so
/// call sites can pass `".header"` or `[".header", ".nav"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct Selectors(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Selectors {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(s) => Self(vec![s]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl Selectors {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Selectors {
    fn from(s: &str) -> Self {
        Self(vec![s.to_string()])
    }
}

impl From<String> for Selectors {
    fn from(s: String) -> Self {
        Self(vec![s])
    }
}

impl From<Vec<String>> for Selectors {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}

impl From<&[&str]> for Selectors {
    fn from(v: &[&str]) -> Self {
        Self(v.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Selectors {
    fn from(v: [&str; N]) -> Self {
        Self(v.iter().map(|s| s.to_string()).collect())
    }
}

/// Identity of the test an assertion belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIdentity {
    /// Full human-readable title of the test
    pub title: String,
    /// File the test was loaded from
    pub file: String,
    /// Browser the test runs in
    pub browser_id: String,
}

impl TestIdentity {
    pub fn new(title: impl Into<String>, file: impl Into<String>, browser_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            file: file.into(),
            browser_id: browser_id.into(),
        }
    }

    /// Short stable id derived from the test file and title
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.file.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.title.as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..7].to_string()
    }
}

/// The screenshot taken for the current invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub path: PathBuf,
    pub size: ImageSize,
}

/// The stored reference (baseline) image for a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub path: PathBuf,
    /// Known only after a successful comparison
    pub size: Option<ImageSize>,
}

impl ReferenceImage {
    pub fn new(path: PathBuf) -> Self {
        Self { path, size: None }
    }
}

/// Page geometry and capabilities reported by the capturer after preparation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Area to capture, in CSS pixels relative to the document
    pub capture_area: Rect,
    /// Areas to blank out before comparison
    #[serde(default)]
    pub ignore_areas: Vec<Rect>,
    /// Visible viewport, in CSS pixels relative to the document
    pub viewport: Rect,
    pub pixel_ratio: f64,
    /// Whether a focused editable element could show a blinking caret
    #[serde(default)]
    pub can_have_caret: bool,
}

/// Extra information the comparator learned about the inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareMeta {
    pub reference_image: Option<ReferenceMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMeta {
    pub size: Option<ImageSize>,
}

/// Result of comparing a reference image with the current one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareResult {
    pub equal: bool,
    pub diff_bounds: Option<Rect>,
    #[serde(default)]
    pub diff_clusters: Vec<Rect>,
    #[serde(default)]
    pub meta_info: CompareMeta,
}

impl CompareResult {
    pub fn equal() -> Self {
        Self {
            equal: true,
            ..Default::default()
        }
    }

    pub fn different(diff_bounds: Rect, diff_clusters: Vec<Rect>) -> Self {
        Self {
            equal: false,
            diff_bounds: Some(diff_bounds),
            diff_clusters,
            meta_info: CompareMeta::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_id_separates_file_and_title() {
        let a = TestIdentity::new("c", "ab", "chromium");
        let b = TestIdentity::new("bc", "a", "chromium");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_selectors_from_yaml_string_or_list() {
        let one: Selectors = serde_json::from_str(r#"".header""#).unwrap();
        assert_eq!(one.as_slice(), &[".header".to_string()]);

        let many: Selectors = serde_json::from_str(r#"[".header", ".nav"]"#).unwrap();
        assert_eq!(many.as_slice().len(), 2);
    }

    #[test]
    fn test_identity_id_is_stable() {
        let a = TestIdentity::new("login page", "specs/login.yaml", "chromium");
        let b = TestIdentity::new("login page", "specs/login.yaml", "firefox");
        assert_eq!(a.id().len(), 7);
        // Browser is not part of the id; it gets its own path segment
        assert_eq!(a.id(), b.id());

        let c = TestIdentity::new("logout page", "specs/login.yaml", "chromium");
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_rect_extend_and_near() {
        let mut r = Rect::point(5.0, 5.0);
        r.extend(&Rect::point(10.0, 2.0));
        assert_eq!(r, Rect::new(2.0, 5.0, 10.0, 5.0));
        assert!(r.is_near(&Rect::point(12.0, 5.0), 2.0));
        assert!(!r.is_near(&Rect::point(13.0, 5.0), 2.0));
    }
}
