//! Frame types produced by camera sources.
//!
//! - `ColorImage`: packed RGB24 pixels handed to detectors.
//! - `DepthImage`: raw 16-bit depth samples aligned to the color image.
//! - `Intrinsics`: per-session calibration used for back-projection.
//! - `Frame`: one synchronized capture, consumed within a single loop iteration.

use anyhow::{anyhow, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Packed RGB24 image.
#[derive(Clone, Debug)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl ColorImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("color frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Solid-color image.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&rgb);
    }
}

/// Raw depth samples in sensor units (see `Intrinsics::depth_scale`).
#[derive(Clone, Debug)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    samples: Vec<u16>,
}

impl DepthImage {
    pub fn new(width: u32, height: u32, samples: Vec<u16>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("depth frame dimensions overflow"))?;
        if samples.len() != expected {
            return Err(anyhow!(
                "expected {} depth samples for {}x{}, received {}",
                expected,
                width,
                height,
                samples.len()
            ));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn filled(width: u32, height: u32, value: u16) -> Self {
        Self {
            width,
            height,
            samples: vec![value; width as usize * height as usize],
        }
    }

    /// Raw sample at `(u, v)`, or `None` outside the image.
    pub fn sample(&self, u: u32, v: u32) -> Option<u16> {
        if u >= self.width || v >= self.height {
            return None;
        }
        Some(self.samples[v as usize * self.width as usize + u as usize])
    }

    pub fn samples_mut(&mut self) -> &mut [u16] {
        &mut self.samples
    }
}

/// Pinhole intrinsics of the stream the depth is aligned to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
    /// Meters per raw depth unit.
    pub depth_scale: f64,
}

impl Intrinsics {
    pub fn validate(&self) -> Result<()> {
        if !(self.fx > 0.0 && self.fy > 0.0) {
            return Err(anyhow!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx,
                self.fy
            ));
        }
        if !(self.depth_scale > 0.0) {
            return Err(anyhow!(
                "depth scale must be positive (got {})",
                self.depth_scale
            ));
        }
        Ok(())
    }
}

/// Capture time and size of one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameMetadata {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
}

/// One synchronized color (+ optional depth) capture.
#[derive(Clone, Debug)]
pub struct Frame {
    pub color: ColorImage,
    pub depth: Option<DepthImage>,
    pub intrinsics: Option<Intrinsics>,
    pub timestamp: f64,
}

impl Frame {
    pub fn new(
        color: ColorImage,
        depth: Option<DepthImage>,
        intrinsics: Option<Intrinsics>,
    ) -> Self {
        Self {
            color,
            depth,
            intrinsics,
            timestamp: unix_seconds(),
        }
    }

    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            timestamp: self.timestamp,
            width: self.color.width,
            height: self.color.height,
        }
    }
}

/// Wall-clock seconds since the Unix epoch (0.0 if the clock is before it).
pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
