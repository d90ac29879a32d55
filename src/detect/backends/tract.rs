#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, Labels};
use crate::detect::yolo::{self, DecodeParams};
use crate::error::ModelLoadError;
use crate::frame::ColorImage;
use crate::payload::Detection;

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based YOLOv8 detector for ONNX exports.
///
/// Loads a local model file once; frames are letterboxed to a square
/// `input_size` input.
pub struct TractYoloDetector {
    model_path: PathBuf,
    input_size: u32,
    params: DecodeParams,
    labels: Labels,
    model: Option<Plan>,
}

impl TractYoloDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        params: DecodeParams,
        labels: Labels,
    ) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            input_size,
            params,
            labels,
            model: None,
        }
    }

    fn build_plan(&self) -> Result<Plan> {
        let size = self.input_size as usize;
        tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, image: &ColorImage) -> Result<(Tensor, yolo::Letterbox)> {
        let size = self.input_size as usize;
        let (data, letterbox) = yolo::letterbox_chw(image, self.input_size);
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), data)
            .context("letterboxed input has the wrong length")?;
        Ok((input.into_tensor(), letterbox))
    }
}

/// Flatten the head output to channel-major order and return the anchor count.
///
/// Accepts `[1, C, N]` (the ultralytics export) and the transposed
/// `[1, N, C]`, telling them apart by which side is larger.
fn channel_major(output: &Tensor) -> Result<(Vec<f32>, usize)> {
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let shape = view.shape().to_vec();
    let (rows, cols) = match shape.as_slice() {
        [1, rows, cols] | [rows, cols] => (*rows, *cols),
        other => return Err(anyhow!("unexpected YOLO output shape {:?}", other)),
    };
    let flat: Vec<f32> = view.iter().copied().collect();
    if rows <= cols {
        return Ok((flat, cols));
    }
    let mut transposed = vec![0.0; flat.len()];
    for n in 0..rows {
        for c in 0..cols {
            transposed[c * rows + n] = flat[n * cols + c];
        }
    }
    Ok((transposed, rows))
}

impl Detector for TractYoloDetector {
    fn name(&self) -> &str {
        "tract"
    }

    fn load(&mut self) -> Result<(), ModelLoadError> {
        if !self.model_path.exists() {
            return Err(ModelLoadError::Missing {
                path: self.model_path.display().to_string(),
            });
        }
        let plan = self.build_plan().map_err(|err| ModelLoadError::Load {
            path: self.model_path.display().to_string(),
            message: format!("{:#}", err),
        })?;
        self.model = Some(plan);
        log::info!(
            "detector tract: loaded {} (input {}px, {} labels)",
            self.model_path.display(),
            self.input_size,
            self.labels.len()
        );
        Ok(())
    }

    fn infer(&mut self, image: &ColorImage) -> Result<Vec<Detection>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract model not loaded"))?;
        let (input, letterbox) = self.build_input(image)?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;

        let (flat, anchors) = channel_major(output)?;
        let candidates = yolo::decode(&flat, anchors, &letterbox, &self.params);
        let kept = yolo::non_max_suppression(
            candidates,
            self.params.iou_threshold,
            self.params.max_detections,
        );
        Ok(kept
            .into_iter()
            .map(|cand| {
                let label = self.labels.name(cand.class_id);
                cand.into_detection(label)
            })
            .collect())
    }
}
