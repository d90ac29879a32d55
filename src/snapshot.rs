//! Latest-frame JPEG with detection boxes, for dashboards polling a file.
//!
//! Whether snapshots can be written is decided once at start-up. A failed
//! write is logged and never affects the frame loop.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::SnapshotSettings;
use crate::frame::ColorImage;
use crate::payload::Detection;

const BOX_RGB: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: i32 = 2;
const TAB_HEIGHT: i32 = 6;

/// Resolved snapshot support.
#[derive(Debug)]
pub enum SnapshotCapability {
    Disabled,
    /// Configured but not usable (missing feature or unwritable directory).
    Unavailable,
    Enabled(SnapshotWriter),
}

impl SnapshotCapability {
    pub fn resolve(settings: &SnapshotSettings) -> Self {
        if !settings.enabled {
            return SnapshotCapability::Disabled;
        }
        if !cfg!(feature = "snapshot-jpeg") {
            log::warn!("snapshot: built without the snapshot-jpeg feature; disabled");
            return SnapshotCapability::Unavailable;
        }
        if let Some(dir) = settings.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(err) = fs::create_dir_all(dir) {
                log::warn!("snapshot: cannot create {}: {}; disabled", dir.display(), err);
                return SnapshotCapability::Unavailable;
            }
        }
        log::info!("snapshot: writing latest frame to {}", settings.path.display());
        SnapshotCapability::Enabled(SnapshotWriter {
            path: settings.path.clone(),
            draw: settings.draw,
        })
    }

    pub fn writer(&self) -> Option<&SnapshotWriter> {
        match self {
            SnapshotCapability::Enabled(writer) => Some(writer),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    draw: bool,
}

impl SnapshotWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overlay (when enabled) on a copy of `image` and replace the file.
    pub fn write(&self, image: &ColorImage, detections: &[Detection]) -> Result<()> {
        let mut canvas = image.clone();
        if self.draw {
            draw_detections(&mut canvas, detections);
        }
        // Write next to the target and rename so readers never see a partial file.
        let tmp = self.path.with_extension("tmp.jpg");
        encode_jpeg(&canvas, &tmp)?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(feature = "snapshot-jpeg")]
fn encode_jpeg(image: &ColorImage, path: &Path) -> Result<()> {
    let buffer = image::RgbImage::from_raw(image.width, image.height, image.pixels().to_vec())
        .context("snapshot buffer size mismatch")?;
    buffer
        .save_with_format(path, image::ImageFormat::Jpeg)
        .with_context(|| format!("encode snapshot {}", path.display()))
}

#[cfg(not(feature = "snapshot-jpeg"))]
fn encode_jpeg(_image: &ColorImage, _path: &Path) -> Result<()> {
    anyhow::bail!("snapshot-jpeg feature disabled")
}

/// Draw each bbox outline plus a filled tab above its top-left corner whose
/// width follows the score.
pub fn draw_detections(image: &mut ColorImage, detections: &[Detection]) {
    for det in detections {
        let [x1, y1, x2, y2] = det.bbox;
        for t in 0..BOX_THICKNESS {
            hline(image, x1, x2, y1 + t);
            hline(image, x1, x2, y2 - t);
            vline(image, x1 + t, y1, y2);
            vline(image, x2 - t, y1, y2);
        }
        let tab_w = ((x2 - x1) as f32 * det.score.clamp(0.0, 1.0)).round() as i32;
        for y in (y1 - TAB_HEIGHT).max(0)..y1.max(0) {
            hline(image, x1, x1 + tab_w, y);
        }
    }
}

fn put(image: &mut ColorImage, x: i32, y: i32) {
    if x >= 0 && y >= 0 {
        image.put_pixel(x as u32, y as u32, BOX_RGB);
    }
}

fn hline(image: &mut ColorImage, x1: i32, x2: i32, y: i32) {
    for x in x1..=x2 {
        put(image, x, y);
    }
}

fn vline(image: &mut ColorImage, x: i32, y1: i32, y2: i32) {
    for y in y1..=y2 {
        put(image, x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, path: PathBuf) -> SnapshotSettings {
        SnapshotSettings {
            enabled,
            path,
            draw: true,
        }
    }

    #[test]
    fn draws_outline_and_clips_at_edges() {
        let mut image = ColorImage::filled(20, 20, [0, 0, 0]);
        let det = Detection::new([-3, 5, 10, 25], 1.0, 0, None);
        draw_detections(&mut image, &[det]);
        assert_eq!(image.pixel(5, 5), Some(BOX_RGB));
        assert_eq!(image.pixel(10, 12), Some(BOX_RGB));
        assert_eq!(image.pixel(5, 12), Some([0, 0, 0]));
        // Score tab above the box.
        assert_eq!(image.pixel(2, 1), Some(BOX_RGB));
    }

    #[test]
    fn disabled_settings_resolve_to_disabled() {
        let cap = SnapshotCapability::resolve(&settings(false, PathBuf::from("x.jpg")));
        assert!(matches!(cap, SnapshotCapability::Disabled));
        assert!(cap.writer().is_none());
    }

    #[cfg(not(feature = "snapshot-jpeg"))]
    #[test]
    fn missing_feature_resolves_to_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cap = SnapshotCapability::resolve(&settings(true, dir.path().join("latest.jpg")));
        assert!(matches!(cap, SnapshotCapability::Unavailable));
    }

    #[cfg(feature = "snapshot-jpeg")]
    #[test]
    fn writes_jpeg_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("latest.jpg");
        let cap = SnapshotCapability::resolve(&settings(true, path.clone()));
        let writer = cap.writer().expect("enabled");
        let image = ColorImage::filled(32, 24, [40, 40, 40]);
        writer.write(&image, &[Detection::new([4, 4, 20, 20], 0.5, 0, None)])?;
        let decoded = image::open(&path)?;
        assert_eq!(decoded.width(), 32);
        assert!(!path.with_extension("tmp.jpg").exists());
        Ok(())
    }
}
