//! YOLOv8 pre- and post-processing, independent of the inference runtime.
//!
//! Input: letterboxed, RGB, NCHW, 0..1. Output: one row per channel
//! (`4 + num_classes` rows of `num_anchors` columns) holding center-x,
//! center-y, width, height in input pixels followed by per-class scores.

use crate::frame::ColorImage;
use crate::payload::Detection;

/// Padding value ultralytics uses for letterboxing (114 / 255).
const PAD_VALUE: f32 = 114.0 / 255.0;
/// Upper bound on boxes fed into NMS.
const MAX_NMS_CANDIDATES: usize = 30_000;

#[derive(Clone, Debug, PartialEq)]
pub struct DecodeParams {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// Only keep these class ids when set.
    pub classes: Option<Vec<i64>>,
    pub max_detections: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            classes: None,
            max_detections: 300,
        }
    }
}

impl DecodeParams {
    pub fn accepts_class(&self, class_id: i64) -> bool {
        self.classes
            .as_ref()
            .is_none_or(|classes| classes.contains(&class_id))
    }
}

/// Mapping between source pixels and the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub src_width: u32,
    pub src_height: u32,
    pub size: u32,
}

impl Letterbox {
    pub fn fit(src_width: u32, src_height: u32, size: u32) -> Self {
        let scale = (size as f32 / src_width.max(1) as f32).min(size as f32 / src_height.max(1) as f32);
        let new_w = (src_width as f32 * scale).round();
        let new_h = (src_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size as f32 - new_w) / 2.0).floor(),
            pad_y: ((size as f32 - new_h) / 2.0).floor(),
            src_width,
            src_height,
            size,
        }
    }

    /// Input-space box back to clamped source pixels.
    pub fn to_source(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let max_x = self.src_width as f32;
        let max_y = self.src_height as f32;
        [
            ((xyxy[0] - self.pad_x) / self.scale).clamp(0.0, max_x),
            ((xyxy[1] - self.pad_y) / self.scale).clamp(0.0, max_y),
            ((xyxy[2] - self.pad_x) / self.scale).clamp(0.0, max_x),
            ((xyxy[3] - self.pad_y) / self.scale).clamp(0.0, max_y),
        ]
    }
}

/// Nearest-neighbour letterbox into a `3 x size x size` planar buffer.
pub fn letterbox_chw(image: &ColorImage, size: u32) -> (Vec<f32>, Letterbox) {
    let lb = Letterbox::fit(image.width, image.height, size);
    let side = size as usize;
    let plane = side * side;
    let mut data = vec![PAD_VALUE; plane * 3];

    let new_w = (image.width as f32 * lb.scale).round() as usize;
    let new_h = (image.height as f32 * lb.scale).round() as usize;
    let (pad_x, pad_y) = (lb.pad_x as usize, lb.pad_y as usize);
    let pixels = image.pixels();
    let src_w = image.width as usize;

    for y in 0..new_h.min(side - pad_y.min(side)) {
        let sy = ((y as f32 + 0.5) / lb.scale) as usize;
        let sy = sy.min(image.height as usize - 1);
        for x in 0..new_w.min(side - pad_x.min(side)) {
            let sx = ((x as f32 + 0.5) / lb.scale) as usize;
            let sx = sx.min(src_w - 1);
            let src = (sy * src_w + sx) * 3;
            let dst = (y + pad_y) * side + x + pad_x;
            for c in 0..3 {
                data[c * plane + dst] = pixels[src + c] as f32 / 255.0;
            }
        }
    }
    (data, lb)
}

/// Candidate box in source pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub xyxy: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

impl Candidate {
    pub fn area(&self) -> f32 {
        (self.xyxy[2] - self.xyxy[0]).max(0.0) * (self.xyxy[3] - self.xyxy[1]).max(0.0)
    }

    pub fn into_detection(self, label: Option<String>) -> Detection {
        let [x1, y1, x2, y2] = self.xyxy;
        Detection::new(
            [
                x1.round() as i32,
                y1.round() as i32,
                x2.round() as i32,
                y2.round() as i32,
            ],
            self.score,
            self.class_id,
            label,
        )
    }
}

pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix1 = a.xyxy[0].max(b.xyxy[0]);
    let iy1 = a.xyxy[1].max(b.xyxy[1]);
    let ix2 = a.xyxy[2].min(b.xyxy[2]);
    let iy2 = a.xyxy[3].min(b.xyxy[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Channel-major YOLOv8 head output to thresholded candidates.
///
/// `output` holds `(4 + num_classes) * num_anchors` values.
pub fn decode(
    output: &[f32],
    num_anchors: usize,
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Vec<Candidate> {
    if num_anchors == 0 || output.len() % num_anchors != 0 {
        return Vec::new();
    }
    let channels = output.len() / num_anchors;
    if channels <= 4 {
        return Vec::new();
    }
    let at = |c: usize, i: usize| output[c * num_anchors + i];

    let mut candidates = Vec::new();
    for i in 0..num_anchors {
        let (class_idx, score) = (4..channels)
            .map(|c| (c - 4, at(c, i)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        let class_id = class_idx as i64;
        if score.is_nan() || score < params.conf_threshold || !params.accepts_class(class_id) {
            continue;
        }
        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let xyxy = letterbox.to_source([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
        candidates.push(Candidate {
            xyxy,
            score,
            class_id,
        });
    }
    candidates
}

/// Class-aware greedy NMS. Output is sorted by descending score.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(MAX_NMS_CANDIDATES);

    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(k, &cand) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}
