//! Network stream / video file source.
//!
//! This module provides `StreamSource` for reading frames from IP cameras (RTSP) and
//! from any URI GStreamer can decode (HTTP streams, `file://` recordings).
//!
//! The stream source is responsible for:
//! - Building and tearing down the decode pipeline
//! - Converting decoded samples to tightly packed RGB24
//! - Surfacing stalls, EOS, and pipeline errors as read failures so the monitor
//!   can recover

use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats, VideoConfig};
use crate::frame::Frame;

/// Stream frame source. Requires the `rtsp-gstreamer` feature.
pub struct StreamSource {
    #[cfg(feature = "rtsp-gstreamer")]
    inner: GstreamerStreamSource,
}

impl StreamSource {
    pub fn new(config: VideoConfig) -> Result<Self> {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Self {
                inner: GstreamerStreamSource::new(config)?,
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            anyhow::bail!(
                "stream {} requires the rtsp-gstreamer feature",
                config.locator
            )
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameSource for StreamSource {
    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.inner.next_frame()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

// Without a decoder backend `StreamSource::new` always fails, so these are unreachable
// in practice but keep the type usable behind `dyn FrameSource`.
#[cfg(not(feature = "rtsp-gstreamer"))]
impl FrameSource for StreamSource {
    fn connect(&mut self) -> Result<()> {
        anyhow::bail!("stream sources require the rtsp-gstreamer feature")
    }

    fn next_frame(&mut self) -> Result<Frame> {
        anyhow::bail!("stream sources require the rtsp-gstreamer feature")
    }

    fn release(&mut self) {}

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            locator: String::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStreamSource {
    config: VideoConfig,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStreamSource {
    fn new(config: VideoConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            config,
            pipeline: None,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    /// rtspsrc for RTSP cameras, uridecodebin for everything else.
    fn pipeline_description(&self) -> String {
        let sink = "videoconvert ! video/x-raw,format=RGB ! \
                    appsink name=appsink sync=false max-buffers=1 drop=true";
        if self.config.locator.starts_with("rtsp://") {
            format!(
                "rtspsrc location={} latency=0 ! decodebin ! {}",
                self.config.locator, sink
            )
        } else {
            format!("uridecodebin uri={} ! {}", self.config.locator, sink)
        }
    }

    fn build_pipeline(&self) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        use gstreamer::prelude::*;

        let pipeline = gstreamer::parse::launch(&self.pipeline_description())
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok((pipeline, appsink))
    }

    fn connect(&mut self) -> Result<()> {
        use gstreamer::prelude::*;

        self.release();
        let (pipeline, appsink) = self.build_pipeline()?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;
        self.pipeline = Some((pipeline, appsink));
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("StreamSource: connected to {}", self.config.locator);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            anyhow::bail!("stream {} failed: {}", self.config.locator, err);
        }

        let timeout = super::stall_limit(self.config.target_fps, 4, 500);
        let (_, appsink) = self
            .pipeline
            .as_ref()
            .context("stream source not connected")?;
        let sample = appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64))
            .ok_or_else(|| anyhow::anyhow!("stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Frame::new(pixels, width, height)
    }

    fn release(&mut self) {
        use gstreamer::prelude::*;

        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!(
                    "StreamSource: failed to stop pipeline for {}: {}",
                    self.config.locator,
                    err
                );
            }
        }
        self.connected_at = None;
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= super::stall_limit(self.config.target_fps, 6, 2_000)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.config.locator.clone(),
        }
    }

    fn poll_bus(&mut self) {
        use gstreamer::prelude::*;

        let Some(bus) = self.pipeline.as_ref().and_then(|(p, _)| p.bus()) else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map stream buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let frame_bytes = data
            .get(..row_bytes * height as usize)
            .context("stream buffer shorter than frame")?;
        return Ok((frame_bytes.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("stream buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

#[cfg(all(test, not(feature = "rtsp-gstreamer")))]
mod tests {
    use super::*;

    #[test]
    fn stream_without_backend_is_rejected() {
        let config = VideoConfig {
            locator: "rtsp://camera-1/stream".to_string(),
            ..VideoConfig::default()
        };
        assert!(StreamSource::new(config).is_err());
    }
}
