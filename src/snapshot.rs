//! Diagnostic snapshots of the current frame.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub const DEFAULT_SNAPSHOT_DIR: &str = "save_image";

const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `frame` as `<dir>/<capture time>.jpg` and return the path.
    ///
    /// A second snapshot within the same second gets a `_N` suffix instead of
    /// replacing the first.
    pub fn save(&self, frame: &Frame) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let stamp = frame.captured_at.format(SNAPSHOT_NAME_FORMAT).to_string();
        let mut path = self.dir.join(format!("{stamp}.jpg"));
        if path.exists() {
            let mut n = 1u32;
            while path.exists() {
                path = self.dir.join(format!("{stamp}_{n}.jpg"));
                n += 1;
            }
            log::warn!(
                "snapshot {stamp}.jpg already exists; writing {} instead",
                path.display()
            );
        }
        frame
            .to_rgb_image()
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}
