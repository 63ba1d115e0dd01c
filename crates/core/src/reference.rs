//! Reference image lookup

use std::path::PathBuf;

use crate::types::TestIdentity;

/// Maps a test and a state name to the path of the reference image.
///
/// Must be a pure function of its inputs: the same test and state always
/// resolve to the same path. Whether the file exists is checked by the caller.
pub trait ReferenceStore: Send + Sync {
    fn resolve_path(&self, test: &TestIdentity, state_name: &str) -> PathBuf;
}

/// Reference store driven by a path template.
///
/// Supported placeholders:
///
/// | Placeholder | Value |
/// |-------------|-------|
/// | `{test_id}` | [`TestIdentity::id`] |
/// | `{test_title}` | test title, percent-encoded |
/// | `{browser}` | browser id |
/// | `{state}` | state name, percent-encoded |
#[derive(Debug, Clone)]
pub struct PatternReferenceStore {
    template: String,
}

impl PatternReferenceStore {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl ReferenceStore for PatternReferenceStore {
    fn resolve_path(&self, test: &TestIdentity, state_name: &str) -> PathBuf {
        let path = self
            .template
            .replace("{test_id}", &test.id())
            .replace("{test_title}", &encode_name(&test.title))
            .replace("{browser}", &encode_name(&test.browser_id))
            .replace("{state}", &encode_name(state_name));
        PathBuf::from(path)
    }
}

/// Encode a name as a single path component.
///
/// Bytes outside `[A-Za-z0-9._-]` (including `%`) become `%XX`, so distinct
/// names always map to distinct components. Names made only of dots are
/// encoded in full to keep them from meaning `.` or `..`.
pub fn encode_name(name: &str) -> String {
    let dots_only = name.bytes().all(|b| b == b'.');
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'.' if dots_only => encoded.push_str("%2E"),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
