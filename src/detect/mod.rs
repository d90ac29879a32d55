mod backend;
mod backends;
pub mod yolo;

pub use backend::{Detector, Labels};
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractYoloDetector;
pub use yolo::DecodeParams;

use crate::config::ModelSettings;
use crate::error::ModelLoadError;

/// Instantiate the configured backend. Weights are loaded later by
/// `Detector::load`.
pub fn build_detector(settings: &ModelSettings) -> Result<Box<dyn Detector>, ModelLoadError> {
    let params = DecodeParams {
        conf_threshold: settings.conf_threshold,
        iou_threshold: settings.iou_threshold,
        classes: settings.classes.clone(),
        ..DecodeParams::default()
    };
    let labels = match settings.labels.as_deref() {
        Some(path) => Labels::load(path)?,
        None => Labels::default(),
    };

    match settings.backend.trim().to_lowercase().as_str() {
        "stub" => Ok(Box::new(StubDetector::new(params, labels))),
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                Ok(Box::new(TractYoloDetector::new(
                    &settings.path,
                    settings.input_size,
                    params,
                    labels,
                )))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                let _ = (params, labels);
                Err(ModelLoadError::FeatureDisabled {
                    backend: "tract",
                    feature: "backend-tract",
                })
            }
        }
        other => Err(ModelLoadError::UnknownBackend(other.to_string())),
    }
}
