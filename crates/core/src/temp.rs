//! Temporary files for current screenshots

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::config::TempConfig;
use crate::error::AssertViewResult;

/// Allocates unique paths for current screenshots.
///
/// Implementations must never hand out the same path twice, including to
/// callers running concurrently on other tests or browsers.
pub trait TempAllocator: Send + Sync {
    fn path(&self, suffix: &str) -> AssertViewResult<PathBuf>;
}

/// Allocates files inside a directory owned by the run.
///
/// Allocated files outlive the assertion that created them; the whole
/// directory is removed when the allocator is dropped unless `keep` is set.
#[derive(Debug)]
pub struct TempDirAllocator {
    dir: TempDir,
    prefix: String,
}

impl TempDirAllocator {
    pub fn new(config: &TempConfig) -> AssertViewResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&config.prefix).keep(config.keep);
        let dir = match &config.dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        debug!("Allocated run temp directory: {}", dir.path().display());

        Ok(Self {
            dir,
            prefix: config.prefix.clone(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

impl TempAllocator for TempDirAllocator {
    fn path(&self, suffix: &str) -> AssertViewResult<PathBuf> {
        // Exclusive create with a random name, so concurrent callers cannot collide
        let file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(suffix)
            .tempfile_in(self.dir.path())?;
        let path = file.into_temp_path().keep().map_err(|e| e.error)?;
        Ok(path)
    }
}
