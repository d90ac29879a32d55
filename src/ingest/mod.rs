//! Camera sources.
//!
//! - Synthetic source (`stub://` URLs): color + aligned depth, for tests and demos
//! - USB/V4L2 devices (feature: ingest-v4l2): color only
//!
//! A source hands out one `Frame` per call. Frames are not buffered; the
//! orchestrator consumes each one within a single loop iteration.

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::config::CameraSettings;
use crate::error::AcquisitionError;
use crate::frame::{Frame, Intrinsics};

pub use synthetic::{SyntheticCamera, SyntheticConfig};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Camera, V4l2Config};

pub trait Camera: Send {
    fn name(&self) -> &str;

    /// Open the device and start streaming. Failure is fatal to the run.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming. Safe to call more than once.
    fn stop(&mut self);

    /// Next synchronized frame. `Ok(None)` means the stream has ended;
    /// an `AcquisitionError` is a per-frame failure the caller may skip.
    fn next_frame(&mut self) -> Result<Option<Frame>, AcquisitionError>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, AcquisitionError> {
        (**self).next_frame()
    }
}

/// Intrinsics as configured for this camera session.
pub fn configured_intrinsics(settings: &CameraSettings) -> Intrinsics {
    Intrinsics {
        fx: settings.fx,
        fy: settings.fy,
        ppx: settings.ppx,
        ppy: settings.ppy,
        depth_scale: settings.depth_scale,
    }
}

/// Pick a source implementation from the configured URL.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn Camera>> {
    if settings.source.starts_with("stub://") {
        let config = SyntheticConfig::from_settings(settings)?;
        return Ok(Box::new(SyntheticCamera::new(config)));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        let config = V4l2Config {
            device: settings.source.clone(),
            target_fps: settings.color.fps,
            width: settings.color.width,
            height: settings.color.height,
        };
        log::warn!(
            "camera {}: v4l2 provides color only; 3D coordinates will be null",
            settings.source
        );
        Ok(Box::new(V4l2Camera::new(config)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        anyhow::bail!(
            "camera source '{}' requires the ingest-v4l2 feature (or use stub://)",
            settings.source
        )
    }
}
