//! Error taxonomy for the frame-to-payload pipeline.
//!
//! Only the failures the orchestrator must tell apart get a typed error here.
//! Start-up plumbing (config, logging, CLI) reports through `anyhow`.

use thiserror::Error;

/// Sink connect/send failure. Isolated per sink and never fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("send to {target} failed: {source}")]
    Send {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("mqtt publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },
}

/// Rigid transform failure. The detection keeps a null `xyz_robot`.
#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("transform must be 4 rows of 4 numbers or a flat list of 16")]
    NotAMatrix,

    #[error("transform must have 4 rows, got {0}")]
    RowCount(usize),

    #[error("transform row {row} must have 4 columns, got {len}")]
    ColumnCount { row: usize, len: usize },

    #[error("transform entry ({row}, {col}) is not a number")]
    NonNumeric { row: usize, col: usize },

    #[error("transform entry ({row}, {col}) is not finite")]
    NonFinite { row: usize, col: usize },

    #[error("transformed point is not finite")]
    NonFiniteResult,
}

/// Frame unavailable for this cycle; the loop skips it and keeps going.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("camera not started")]
    NotStarted,

    #[error("frame timed out after {0} ms")]
    Timeout(u64),

    #[error("incomplete frame: {0}")]
    Incomplete(String),

    #[error("camera device error: {0}")]
    Device(String),
}

/// Detector initialization failure. Fatal before the loop starts.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file {path} not found")]
    Missing { path: String },

    #[error("unknown detector backend '{0}'")]
    UnknownBackend(String),

    #[error("backend '{backend}' requires the {feature} feature")]
    FeatureDisabled {
        backend: &'static str,
        feature: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    Load { path: String, message: String },
}
