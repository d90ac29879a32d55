//! depthcast
//!
//! Turns synchronized color + depth frames into 3D object detections and
//! streams them to downstream consumers (robot controllers, dashboards).
//!
//! # Pipeline
//!
//! 1. A `Camera` hands out one frame at a time; nothing is queued.
//! 2. The `FrameScheduler` throttles to `max_fps` in realtime mode, or warms
//!    up and admits exactly one frame in single-shot mode.
//! 3. A `Detector` returns bounding boxes; the depth sample at each box
//!    center is back-projected through the camera intrinsics, then
//!    optionally through a rigid camera-to-robot transform.
//! 4. One immutable `Payload` per frame is fanned out to every enabled sink
//!    (UDP JSON, TCP JSON lines, KUKA EKI XML, MQTT). A failing sink never
//!    blocks the others or the next frame.
//!
//! # Module Structure
//!
//! - `geometry`: back-projection and rigid transforms
//! - `payload`: detection records and wire encoding
//! - `sink`: output transports
//! - `scheduler`: pacing and run modes
//! - `pipeline`: the frame loop
//! - `ingest`, `detect`: camera and detector collaborators
//! - `config`, `logging`, `error`, `snapshot`: ambient plumbing

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod snapshot;

pub use config::{AppConfig, ConfigFormat};
pub use detect::{build_detector, DecodeParams, Detector, Labels, StubDetector};
pub use error::{AcquisitionError, GeometryError, ModelLoadError, TransportError};
pub use frame::{ColorImage, DepthImage, Frame, FrameMetadata, Intrinsics};
pub use geometry::{apply_rigid_transform, pixel_depth_to_point, Point3, RigidTransform};
pub use ingest::{open_camera, Camera, SyntheticCamera};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Camera, V4l2Config};
pub use payload::{Detection, FrameSize, Payload, PayloadBuilder};
pub use pipeline::{CancellationToken, Pipeline, RunSummary};
pub use scheduler::{Admission, FrameScheduler, RunMode};
pub use sink::{
    build_sinks, EkiOptions, MqttSink, NetworkDatagramSink, NetworkTextSink, SendOutcome, Sink,
    StructuredDocumentSink,
};
