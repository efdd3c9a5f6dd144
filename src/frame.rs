//! Acquired frames and the site region of interest.
//!
//! - `Frame`: RGB24 pixels from a source. Owned by the monitor for one iteration.
//! - `RegionOfInterest`: the fixed crop both feature extractors score.
//!
//! Frames are validated at construction so everything downstream of ingestion can
//! treat them as well-formed.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};

/// Site camera framing: frames are rescaled to this canvas before cropping.
pub const CANVAS_WIDTH: u32 = 1000;
pub const CANVAS_HEIGHT: u32 = 750;

/// Crop over the stack outlet, in canvas coordinates (rows 230..300, cols 310..410).
pub const SITE_ROI: RegionOfInterest = RegionOfInterest {
    x: 310,
    y: 230,
    width: 100,
    height: 70,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    fn fits(&self, width: u32, height: u32) -> bool {
        self.x + self.width <= width && self.y + self.height <= height
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One acquired image sample.
///
/// Not `Clone`: a frame lives for exactly one monitor iteration and is dropped
/// before the next read.
pub struct Frame {
    /// Tightly packed RGB24 rows.
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap decoded RGB24 pixels. Called by the ingestion layer.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has empty dimensions {}x{}", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Local::now(),
        })
    }

    /// Intensity plane of the site region of interest.
    pub fn region_of_interest(&self) -> GrayImage {
        self.region(SITE_ROI)
    }

    /// Rescale to the site canvas, crop `roi`, and convert to BT.601 luma.
    pub fn region(&self, roi: RegionOfInterest) -> GrayImage {
        let canvas = self.canvas();
        let roi = if roi.fits(CANVAS_WIDTH, CANVAS_HEIGHT) {
            roi
        } else {
            RegionOfInterest {
                x: 0,
                y: 0,
                width: CANVAS_WIDTH,
                height: CANVAS_HEIGHT,
            }
        };
        let crop = imageops::crop_imm(&canvas, roi.x, roi.y, roi.width, roi.height).to_image();
        to_luma(&crop)
    }

    /// Full frame as an image buffer (diagnostic snapshots).
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length was checked in `new`, so this cannot fail.
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    fn canvas(&self) -> RgbImage {
        let full = self.to_rgb_image();
        if self.width == CANVAS_WIDTH && self.height == CANVAS_HEIGHT {
            return full;
        }
        imageops::resize(&full, CANVAS_WIDTH, CANVAS_HEIGHT, FilterType::Triangle)
    }
}

fn to_luma(rgb: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }
    gray
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame::new(pixels, width, height).unwrap()
    }

    #[test]
    fn rejects_mismatched_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn roi_has_site_dimensions() {
        let frame = solid_frame(640, 480, [10, 20, 30]);
        let roi = frame.region_of_interest();
        assert_eq!(roi.width(), SITE_ROI.width);
        assert_eq!(roi.height(), SITE_ROI.height);
    }

    #[test]
    fn luma_uses_bt601_weights() {
        let frame = solid_frame(CANVAS_WIDTH, CANVAS_HEIGHT, [255, 0, 0]);
        let roi = frame.region_of_interest();
        // 0.299 * 255 = 76.2
        assert!(roi.pixels().all(|p| p.0[0] == 76));
    }

    #[test]
    fn snapshot_image_matches_dimensions() {
        let frame = solid_frame(8, 4, [1, 2, 3]);
        let img = frame.to_rgb_image();
        assert_eq!(img.dimensions(), (8, 4));
        assert_eq!(img.get_pixel(7, 3).0, [1, 2, 3]);
    }
}
