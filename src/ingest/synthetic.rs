//! Synthetic frame source (`stub://`).
//!
//! Renders a high-contrast scene and blends it toward a flat grey haze whose density
//! drifts slowly over time, so contrast and histogram signals rise and fall the way
//! they do when dust clouds pass the camera.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats, VideoConfig};
use crate::frame::Frame;

/// Frames per full haze cycle.
const HAZE_PERIOD_FRAMES: f64 = 600.0;
const HAZE_GREY: f64 = 170.0;

pub struct SyntheticSource {
    config: VideoConfig,
    frame_count: u64,
    connected: bool,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic noise, for tests.
    pub fn with_seed(config: VideoConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }

    /// Haze density in [0, 0.9] for the current frame.
    fn haze(&self) -> f64 {
        let phase = self.frame_count as f64 / HAZE_PERIOD_FRAMES * std::f64::consts::TAU;
        0.45 * (1.0 - phase.cos())
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let haze = self.haze();
        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                // Structure: 8px checker with a diagonal stripe.
                let base = if ((x / 8) + (y / 8)) % 2 == 0 { 40.0 } else { 220.0 };
                let base = if (x + y) % 32 < 2 { 255.0 } else { base };
                let noise = self.rng.gen_range(-6.0..6.0);
                let value = (1.0 - haze) * base + haze * HAZE_GREY + noise;
                let v = value.round().clamp(0.0, 255.0) as u8;
                let offset = (y * w + x) * 3;
                pixels[offset] = v;
                pixels[offset + 1] = v;
                pixels[offset + 2] = v;
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} (synthetic)",
            self.config.locator
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            anyhow::bail!("synthetic source {} not connected", self.config.locator);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.config.width, self.config.height)
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
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
    use crate::extract::contrast_variance;

    fn stub_config() -> VideoConfig {
        VideoConfig {
            locator: "stub://test".to_string(),
            target_fps: 7,
            width: 320,
            height: 240,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = SyntheticSource::with_seed(stub_config(), 1);
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        Ok(())
    }

    #[test]
    fn released_source_refuses_reads() -> Result<()> {
        let mut source = SyntheticSource::with_seed(stub_config(), 1);
        source.connect()?;
        source.release();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn haze_lowers_contrast() -> Result<()> {
        let mut source = SyntheticSource::with_seed(stub_config(), 7);
        source.connect()?;
        let clear = source.next_frame()?;
        // Skip to the densest point of the haze cycle.
        source.frame_count = (HAZE_PERIOD_FRAMES / 2.0) as u64 - 1;
        let hazy = source.next_frame()?;
        assert!(
            contrast_variance(&clear.region_of_interest())
                > contrast_variance(&hazy.region_of_interest())
        );
        Ok(())
    }
}
