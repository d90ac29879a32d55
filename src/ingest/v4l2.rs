//! V4L2 color camera.
//!
//! Captures RGB24 frames from a local device node (e.g. /dev/video0) through
//! an mmap stream. There is no depth stream, so frames carry neither depth
//! nor intrinsics and detections leave `xyz` null.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::Camera;
use crate::error::AcquisitionError;
use crate::frame::{ColorImage, Frame};

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g. "/dev/video0").
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Camera {
    config: V4l2Config,
    state: Option<V4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
        }
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn start(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "camera {}: failed to set format: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!(
                "v4l2 device {} does not deliver RGB24 (got {})",
                self.config.device,
                format.fourcc
            );
        }

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("camera {}: failed to set fps: {}", self.config.device, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "camera {}: started {}x{} (v4l2, color only)",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "camera {}: stopped after {} frames",
                self.config.device,
                self.frame_count
            );
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, AcquisitionError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or(AcquisitionError::NotStarted)?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| AcquisitionError::Device(err.to_string()))?;

        let color = ColorImage::new(self.active_width, self.active_height, pixels)
            .map_err(|err| AcquisitionError::Incomplete(err.to_string()))?;
        self.frame_count += 1;
        Ok(Some(Frame::new(color, None, None)))
    }
}
