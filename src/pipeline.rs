//! Frame loop: acquire, pace, detect, locate in 3D, build payload, fan out.
//!
//! Everything runs on the calling thread, one frame at a time. Per-frame
//! failures (acquisition, inference, geometry, any single sink) are logged
//! and counted; only start-up errors and a camera that keeps failing end
//! the run with an error.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::config::AppConfig;
use crate::detect::{build_detector, Detector};
use crate::frame::Frame;
use crate::geometry::{bbox_center, pixel_depth_to_point, RigidTransform};
use crate::ingest::{open_camera, Camera};
use crate::payload::{Detection, Payload, PayloadBuilder};
use crate::scheduler::{Admission, FrameScheduler, RunMode};
use crate::sink::{build_sinks, SendOutcome, Sink};
use crate::snapshot::SnapshotCapability;
use serde_json::Value;

/// Cooperative stop flag shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one `run`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub frames_throttled: u64,
    pub warmup_skipped: u64,
    pub acquisition_failures: u64,
    pub inference_failures: u64,
    /// Successful sends, counted per sink.
    pub payloads_sent: u64,
    /// Sends that errored or were dropped, counted per sink.
    pub sink_failures: u64,
    pub interrupted: bool,
}

pub struct Pipeline {
    camera: Box<dyn Camera>,
    detector: Box<dyn Detector>,
    sinks: Vec<Box<dyn Sink>>,
    scheduler: FrameScheduler,
    builder: PayloadBuilder,
    transform: Option<RigidTransform>,
    compute_xyz: bool,
    max_consecutive_failures: u32,
    snapshot: SnapshotCapability,
    payload_out: Box<dyn Write + Send>,
    bad_intrinsics_logged: bool,
    started: bool,
    shut_down: bool,
}

impl Pipeline {
    /// Build camera, detector and sinks from configuration.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let camera = open_camera(&cfg.camera)?;
        let detector = build_detector(&cfg.model)?;
        let sinks = build_sinks(&cfg.output)?;
        Ok(Self::new(camera, detector, sinks, cfg))
    }

    pub fn new(
        camera: Box<dyn Camera>,
        detector: Box<dyn Detector>,
        sinks: Vec<Box<dyn Sink>>,
        cfg: &AppConfig,
    ) -> Self {
        let runtime = &cfg.runtime;
        Self {
            camera,
            detector,
            sinks,
            scheduler: FrameScheduler::new(runtime.mode, runtime.max_fps, runtime.warmup_frames),
            builder: PayloadBuilder::new(cfg.output.max_detections),
            transform: resolve_transform(cfg.calibration.cam_to_robot.as_ref()),
            compute_xyz: runtime.compute_xyz,
            max_consecutive_failures: runtime.max_consecutive_failures,
            snapshot: SnapshotCapability::resolve(&cfg.output.snapshot),
            payload_out: Box::new(std::io::stdout()),
            bad_intrinsics_logged: false,
            started: false,
            shut_down: false,
        }
    }

    /// Where single-shot mode prints its payload (stdout by default).
    pub fn with_payload_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.payload_out = out;
        self
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Start the camera and load the detector. Either failing is fatal.
    pub fn start(&mut self) -> Result<()> {
        self.camera
            .start()
            .with_context(|| format!("start camera {}", self.camera.name()))?;
        self.detector
            .load()
            .with_context(|| format!("load detector {}", self.detector.name()))?;
        self.started = true;
        log::info!(
            "pipeline started: mode={}, camera={}, detector={}, sinks=[{}]",
            self.scheduler.mode(),
            self.camera.name(),
            self.detector.name(),
            self.sinks
                .iter()
                .map(|s| s.name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    pub fn run(&mut self, token: &CancellationToken) -> Result<RunSummary> {
        if !self.started {
            return Err(anyhow!("pipeline not started"));
        }
        let origin = Instant::now();
        let mut summary = RunSummary::default();
        let mut consecutive_failures = 0u32;

        loop {
            if token.is_cancelled() {
                log::info!("interrupted by user");
                summary.interrupted = true;
                break;
            }

            let frame = match self.camera.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) => {
                    log::info!("camera {}: end of stream", self.camera.name());
                    break;
                }
                Err(err) => {
                    summary.acquisition_failures += 1;
                    consecutive_failures += 1;
                    log::warn!("frame skipped: {}", err);
                    if self.max_consecutive_failures > 0
                        && consecutive_failures >= self.max_consecutive_failures
                    {
                        return Err(anyhow!(
                            "camera {} failed {} frames in a row (last: {})",
                            self.camera.name(),
                            consecutive_failures,
                            err
                        ));
                    }
                    continue;
                }
            };
            summary.frames_seen += 1;

            match self.scheduler.admit(origin.elapsed()) {
                Admission::Process => {}
                Admission::Warmup => {
                    summary.warmup_skipped += 1;
                    continue;
                }
                Admission::Throttled => {
                    summary.frames_throttled += 1;
                    continue;
                }
                Admission::Finished => break,
            }

            let mut detections = match self.detector.infer(&frame.color) {
                Ok(detections) => detections,
                Err(err) => {
                    summary.inference_failures += 1;
                    log::warn!("inference failed: {:#}", err);
                    continue;
                }
            };
            self.locate(&frame, &mut detections);

            let payload = self.builder.build(frame.metadata(), &detections);
            self.fan_out(&payload, &mut summary);
            self.write_snapshot(&frame, &detections);
            summary.frames_processed += 1;

            if self.scheduler.complete() {
                self.print_payload(&payload)?;
                break;
            }
        }

        log::info!(
            "run finished: seen={}, processed={}, throttled={}, warmup={}, acquisition_failures={}, sent={}, sink_failures={}",
            summary.frames_seen,
            summary.frames_processed,
            summary.frames_throttled,
            summary.warmup_skipped,
            summary.acquisition_failures,
            summary.payloads_sent,
            summary.sink_failures
        );
        Ok(summary)
    }

    /// Fill `xyz` (and `xyz_robot`) from the depth sample at each bbox center.
    fn locate(&mut self, frame: &Frame, detections: &mut [Detection]) {
        if !self.compute_xyz {
            return;
        }
        let (Some(depth), Some(intrinsics)) = (&frame.depth, &frame.intrinsics) else {
            return;
        };
        if let Err(err) = intrinsics.validate() {
            if !self.bad_intrinsics_logged {
                log::warn!("camera {}: xyz left null: {}", self.camera.name(), err);
                self.bad_intrinsics_logged = true;
            }
            return;
        }
        for det in detections.iter_mut() {
            let (u, v) = bbox_center(det.bbox);
            let raw = depth.sample(u, v).unwrap_or(0);
            if raw == 0 {
                continue;
            }
            let point = pixel_depth_to_point(u, v, raw as f64, intrinsics);
            if !point.is_finite() {
                continue;
            }
            det.xyz = Some(point);
            if let Some(transform) = &self.transform {
                match transform.apply(point) {
                    Ok(robot) => det.xyz_robot = Some(robot),
                    Err(err) => log::warn!("xyz_robot left null: {}", err),
                }
            }
        }
    }

    fn fan_out(&mut self, payload: &Payload, summary: &mut RunSummary) {
        for sink in self.sinks.iter_mut() {
            match sink.send(payload) {
                Ok(SendOutcome::Dropped) => summary.sink_failures += 1,
                Ok(_) => summary.payloads_sent += 1,
                Err(err) => {
                    summary.sink_failures += 1;
                    log::warn!("sink {}: {}", sink.name(), err);
                }
            }
        }
    }

    fn write_snapshot(&self, frame: &Frame, detections: &[Detection]) {
        if let Some(writer) = self.snapshot.writer() {
            if let Err(err) = writer.write(&frame.color, detections) {
                log::warn!("snapshot {}: {:#}", writer.path().display(), err);
            }
        }
    }

    fn print_payload(&mut self, payload: &Payload) -> Result<()> {
        if self.scheduler.mode() != RunMode::Single {
            return Ok(());
        }
        let line = payload.to_json_line()?;
        self.payload_out
            .write_all(line.as_bytes())
            .and_then(|_| self.payload_out.flush())
            .context("write single-shot payload")
    }

    /// Stop the camera and close every sink. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.camera.stop();
        for sink in self.sinks.iter_mut() {
            sink.close();
        }
        log::info!("pipeline stopped");
    }
}

/// Validate the configured matrix once. A malformed matrix is logged and
/// disables `xyz_robot` for the whole run.
fn resolve_transform(value: Option<&Value>) -> Option<RigidTransform> {
    match RigidTransform::from_value(value?) {
        Ok(transform) => Some(transform),
        Err(err) => {
            log::error!("calibration T_cam_to_robot ignored: {}", err);
            None
        }
    }
}
