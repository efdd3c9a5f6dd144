//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for reading frames from local V4L2 devices
//! (`/dev/videoN`, or a bare index `N` in the locator).
//!
//! The device is negotiated for RGB24; when the driver refuses, its current NV12 or
//! YUYV format is accepted instead. All are normalized to RGB24 before a `Frame` is built.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats, VideoConfig};
use crate::frame::Frame;

pub struct V4l2Source {
    config: VideoConfig,
    state: Option<V4l2State>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: VideoConfig) -> Result<Self> {
        Ok(Self {
            active_width: config.width,
            active_height: config.height,
            active_format: PixelFormat::Rgb24,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn negotiate(&self, device: &v4l::Device) -> Result<(u32, u32, PixelFormat)> {
        use v4l::video::Capture;

        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = self.config.width;
        requested.height = self.config.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let format = device.set_format(&requested).or_else(|err| {
            log::warn!(
                "V4l2Source: {} refused RGB3 ({}), keeping its current format",
                self.config.locator,
                err
            );
            device.format()
        })?;
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} delivers unsupported format {}",
                self.config.locator,
                String::from_utf8_lossy(&format.fourcc.repr)
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: {} ignored fps request: {}", self.config.locator, err);
            }
        }
        Ok((format.width, format.height, pixel_format))
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;

        self.release();

        let device = v4l::Device::with_path(&self.config.locator)
            .with_context(|| format!("open v4l2 device {}", self.config.locator))?;
        let (width, height, format) = self.negotiate(&device)?;
        self.active_width = width;
        self.active_height = height;
        self.active_format = format;
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.locator,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, format) = (self.active_width, self.active_height, self.active_format);
        let captured = state.with_mut(|fields| {
            let (buf, meta) = fields.stream.next()?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            Ok::<_, std::io::Error>(buf[..used].to_vec())
        });
        let raw = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow::Error::new(err).context("capture v4l2 frame")
        })?;

        let pixels = normalize_to_rgb(&raw, width, height, format)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.locator);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= super::stall_limit(self.config.target_fps, 6, 2_000)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.config.locator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_fails_to_connect() {
        let config = VideoConfig {
            locator: "/dev/video-does-not-exist".to_string(),
            ..VideoConfig::default()
        };
        let mut source = V4l2Source::new(config).unwrap();
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
    }
}
