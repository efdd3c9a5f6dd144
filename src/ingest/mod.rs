//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Network streams and video files via GStreamer (feature: rtsp-gstreamer)
//! - Local V4L2 devices by index or path (feature: ingest-v4l2)
//! - Synthetic `stub://` source (testing, dry runs)
//!
//! Every source produces validated RGB24 `Frame`s. The monitor owns the source
//! exclusively: it connects in `Opening`, releases and reconnects in `Recovering`,
//! and releases once more when it stops.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::Duration;

use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod rtsp;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use rtsp::StreamSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A video device or stream the monitor can read frames from.
pub trait FrameSource {
    /// Open (or reopen) the underlying device.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is decoded or the device reports failure.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device handle. Safe to call when not connected.
    fn release(&mut self);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub locator: String,
}

/// Configuration for a video source.
#[derive(Clone, Debug)]
pub struct VideoConfig {
    /// `stub://name`, a device index (`0`), a device path (`/dev/video0`),
    /// a stream URL (`rtsp://...`) or a local video file.
    pub locator: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width (synthetic and V4L2 sources).
    pub width: u32,
    /// Preferred frame height (synthetic and V4L2 sources).
    pub height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            locator: "rtsp://localhost:8554/mystream".to_string(),
            target_fps: 7,
            width: 640,
            height: 480,
        }
    }
}

/// Parsed form of `VideoConfig::locator`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VideoLocator {
    Synthetic(String),
    Device(String),
    Stream(String),
}

impl VideoLocator {
    pub fn parse(locator: &str) -> Result<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(anyhow!("video locator is empty"));
        }
        if locator.starts_with("stub://") {
            return Ok(VideoLocator::Synthetic(locator.to_string()));
        }
        if locator.chars().all(|c| c.is_ascii_digit()) {
            return Ok(VideoLocator::Device(format!("/dev/video{}", locator)));
        }
        if locator.starts_with("/dev/") {
            return Ok(VideoLocator::Device(locator.to_string()));
        }
        if locator.contains("://") {
            return Ok(VideoLocator::Stream(locator.to_string()));
        }
        let path = Path::new(locator);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(VideoLocator::Stream(format!("file://{}", absolute.display())))
    }
}

/// Build the source for `config.locator`. Does not connect.
pub fn open_source(config: &VideoConfig) -> Result<Box<dyn FrameSource>> {
    match VideoLocator::parse(&config.locator)? {
        VideoLocator::Synthetic(_) => Ok(Box::new(SyntheticSource::new(config.clone()))),
        VideoLocator::Stream(url) => {
            let config = VideoConfig {
                locator: url,
                ..config.clone()
            };
            Ok(Box::new(StreamSource::new(config)?))
        }
        #[cfg(feature = "ingest-v4l2")]
        VideoLocator::Device(device) => {
            let config = VideoConfig {
                locator: device,
                ..config.clone()
            };
            Ok(Box::new(V4l2Source::new(config)?))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        VideoLocator::Device(device) => Err(anyhow!(
            "local device {} requires the ingest-v4l2 feature",
            device
        )),
    }
}

/// `frames` frame intervals at `target_fps`, never less than `floor_ms`.
#[cfg_attr(
    not(any(feature = "rtsp-gstreamer", feature = "ingest-v4l2")),
    allow(dead_code)
)]
pub(crate) fn stall_limit(target_fps: u32, frames: u32, floor_ms: u64) -> Duration {
    let interval_ms = match target_fps {
        0 => 0,
        fps => u64::from(1000 / fps),
    };
    Duration::from_millis((interval_ms * u64::from(frames)).max(floor_ms))
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}
