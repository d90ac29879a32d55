use anyhow::Result;
use std::path::Path;

use crate::error::ModelLoadError;
use crate::frame::ColorImage;
use crate::payload::Detection;

/// Object detector.
///
/// `infer` returns detections in the detector's own order (usually by
/// descending score) with `xyz` and `xyz_robot` unset; the orchestrator
/// fills those in.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Load weights and prepare for inference. Called once before the loop.
    fn load(&mut self) -> Result<(), ModelLoadError>;

    /// Run detection on one color image.
    fn infer(&mut self, image: &ColorImage) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load(&mut self) -> Result<(), ModelLoadError> {
        (**self).load()
    }

    fn infer(&mut self, image: &ColorImage) -> Result<Vec<Detection>> {
        (**self).infer(image)
    }
}

/// Class names indexed by class id, one per line in the labels file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ModelLoadError::Load {
            path: path.display().to_string(),
            message: format!("read labels: {}", err),
        })?;
        Ok(Self::parse(&raw))
    }

    /// Blank lines and `#` comments are skipped.
    pub fn parse(raw: &str) -> Self {
        let names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { names }
    }

    pub fn name(&self, class_id: i64) -> Option<String> {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
