//! Device pixel formats to packed RGB24.

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
            PixelFormat::Yuyv => pixels.checked_mul(2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.expected_len(width, height)?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame too short: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    let pixels = &pixels[..expected];
    let (w, h) = (width as usize, height as usize);
    Ok(match format {
        PixelFormat::Rgb24 => pixels.to_vec(),
        PixelFormat::Nv12 => {
            let y_plane = w * h;
            let mut rgb = Vec::with_capacity(y_plane * 3);
            for j in 0..h {
                for i in 0..w {
                    let uv = y_plane + (j / 2) * w + (i / 2) * 2;
                    rgb.extend_from_slice(&yuv_to_rgb(pixels[j * w + i], pixels[uv], pixels[uv + 1]));
                }
            }
            rgb
        }
        PixelFormat::Yuyv => {
            let mut rgb = Vec::with_capacity(w * h * 3);
            for quad in pixels.chunks_exact(4) {
                let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            rgb
        }
    })
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402 * v),
        clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_to_u8(y + 1.772 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
