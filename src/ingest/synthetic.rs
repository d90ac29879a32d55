//! Synthetic RGB-D source for `stub://` URLs.
//!
//! Renders a bright square drifting left to right over a dark background,
//! with an aligned depth plane in which the square sits closer to the
//! camera. Query parameters on the URL tune it:
//!
//! - `frames=N`: end the stream after N frames
//! - `drop_every=N`: fail every Nth capture with a timeout
//! - `depth=0`: produce color only

use anyhow::{anyhow, Context, Result};
use std::thread;
use std::time::{Duration, Instant};

use super::{configured_intrinsics, Camera};
use crate::config::CameraSettings;
use crate::error::AcquisitionError;
use crate::frame::{ColorImage, DepthImage, Frame, Intrinsics};

const BACKGROUND_RGB: [u8; 3] = [32, 32, 32];
const TARGET_RGB: [u8; 3] = [240, 240, 240];
/// Raw depth units (1.5 m at 1 mm per unit).
const BACKGROUND_DEPTH: u16 = 1500;
const TARGET_DEPTH: u16 = 800;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Capture pacing; 0 produces frames as fast as they are requested.
    pub fps: u32,
    pub intrinsics: Intrinsics,
    pub with_depth: bool,
    pub frame_limit: Option<u64>,
    pub drop_every: Option<u64>,
}

impl SyntheticConfig {
    pub fn from_settings(settings: &CameraSettings) -> Result<Self> {
        let mut config = Self {
            source: settings.source.clone(),
            width: settings.color.width,
            height: settings.color.height,
            fps: settings.color.fps,
            intrinsics: configured_intrinsics(settings),
            with_depth: true,
            frame_limit: None,
            drop_every: None,
        };

        let query = settings
            .source
            .split_once('?')
            .map(|(_, q)| q)
            .unwrap_or_default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid stub source parameter '{}'", pair))?;
            match key {
                "frames" => {
                    config.frame_limit =
                        Some(value.parse().context("stub frames must be an integer")?)
                }
                "drop_every" => {
                    let n: u64 = value.parse().context("stub drop_every must be an integer")?;
                    config.drop_every = (n > 0).then_some(n);
                }
                "depth" => config.with_depth = value != "0" && value != "false",
                other => return Err(anyhow!("unknown stub source parameter '{}'", other)),
            }
        }
        Ok(config)
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    started: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            started: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Square bounds `[x1, y1, x2, y2)` for a given frame index.
    pub fn target_bounds(&self, index: u64) -> [u32; 4] {
        let side = (self.config.width.min(self.config.height) / 5).max(1);
        let travel = self.config.width.saturating_sub(side).max(1) as u64;
        let x1 = ((index * 4) % travel) as u32;
        let y1 = (self.config.height.saturating_sub(side)) / 2;
        [x1, y1, x1 + side, y1 + side]
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.config.fps as f64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn render(&self, index: u64) -> Frame {
        let (w, h) = (self.config.width, self.config.height);
        let [x1, y1, x2, y2] = self.target_bounds(index);

        let mut color = ColorImage::filled(w, h, BACKGROUND_RGB);
        for y in y1..y2.min(h) {
            for x in x1..x2.min(w) {
                color.put_pixel(x, y, TARGET_RGB);
            }
        }

        let depth = self.config.with_depth.then(|| {
            let mut depth = DepthImage::filled(w, h, BACKGROUND_DEPTH);
            let samples = depth.samples_mut();
            for y in y1..y2.min(h) {
                let row = y as usize * w as usize;
                for x in x1..x2.min(w) {
                    samples[row + x as usize] = TARGET_DEPTH;
                }
            }
            depth
        });
        let intrinsics = self.config.with_depth.then_some(self.config.intrinsics);

        Frame::new(color, depth, intrinsics)
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &str {
        &self.config.source
    }

    fn start(&mut self) -> Result<()> {
        self.config.intrinsics.validate()?;
        self.started = true;
        log::info!(
            "camera {}: started {}x{} @ {} fps (synthetic, depth: {})",
            self.config.source,
            self.config.width,
            self.config.height,
            self.config.fps,
            self.config.with_depth
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.started {
            log::info!(
                "camera {}: stopped after {} frames",
                self.config.source,
                self.frame_count
            );
        }
        self.started = false;
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, AcquisitionError> {
        if !self.started {
            return Err(AcquisitionError::NotStarted);
        }
        if self
            .config
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }

        self.pace();
        let index = self.frame_count;
        self.frame_count += 1;

        if let Some(n) = self.config.drop_every {
            if self.frame_count.is_multiple_of(n) {
                return Err(AcquisitionError::Timeout(5000));
            }
        }
        Ok(Some(self.render(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigFormat};

    fn settings(source: &str) -> CameraSettings {
        let mut cfg = AppConfig::parse("{}", ConfigFormat::Json).unwrap();
        cfg.camera.source = source.to_string();
        cfg.camera.color.width = 160;
        cfg.camera.color.height = 120;
        cfg.camera.color.fps = 0;
        cfg.camera
    }

    fn camera(source: &str) -> SyntheticCamera {
        SyntheticCamera::new(SyntheticConfig::from_settings(&settings(source)).unwrap())
    }

    #[test]
    fn refuses_frames_before_start() {
        let mut cam = camera("stub://cam");
        assert!(matches!(cam.next_frame(), Err(AcquisitionError::NotStarted)));
    }

    #[test]
    fn renders_target_in_color_and_depth() -> Result<()> {
        let mut cam = camera("stub://cam");
        cam.start()?;
        let frame = cam.next_frame()?.expect("frame");
        assert_eq!(frame.color.width, 160);
        assert_eq!(frame.color.height, 120);

        let [x1, y1, x2, y2] = cam.target_bounds(0);
        let (cx, cy) = ((x1 + x2) / 2, (y1 + y2) / 2);
        assert_eq!(frame.color.pixel(cx, cy), Some(TARGET_RGB));
        assert_eq!(frame.color.pixel(159, 0), Some(BACKGROUND_RGB));

        let depth = frame.depth.as_ref().expect("depth");
        assert_eq!(depth.sample(cx, cy), Some(TARGET_DEPTH));
        assert_eq!(depth.sample(159, 0), Some(BACKGROUND_DEPTH));
        assert!(frame.intrinsics.is_some());
        Ok(())
    }

    #[test]
    fn target_moves_between_frames() {
        let cam = camera("stub://cam");
        assert_ne!(cam.target_bounds(0), cam.target_bounds(1));
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut cam = camera("stub://cam?frames=2");
        cam.start()?;
        assert!(cam.next_frame()?.is_some());
        assert!(cam.next_frame()?.is_some());
        assert!(cam.next_frame()?.is_none());
        assert_eq!(cam.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn drop_every_injects_timeouts() -> Result<()> {
        let mut cam = camera("stub://cam?drop_every=2&depth=0");
        cam.start()?;
        let frame = cam.next_frame()?.expect("frame");
        assert!(frame.depth.is_none());
        assert!(frame.intrinsics.is_none());
        assert!(matches!(cam.next_frame(), Err(AcquisitionError::Timeout(_))));
        assert!(cam.next_frame()?.is_some());
        Ok(())
    }

    #[test]
    fn rejects_unknown_parameters() {
        assert!(SyntheticConfig::from_settings(&settings("stub://cam?fps=3")).is_err());
        assert!(SyntheticConfig::from_settings(&settings("stub://cam?frames")).is_err());
    }
}
