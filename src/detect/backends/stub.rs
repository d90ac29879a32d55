use anyhow::Result;

use crate::detect::backend::{Detector, Labels};
use crate::detect::yolo::DecodeParams;
use crate::error::ModelLoadError;
use crate::frame::ColorImage;
use crate::payload::Detection;

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_MIN_AREA: usize = 16;
const STUB_CLASS_ID: i64 = 0;

/// Stub detector for testing. Reports each connected bright region as one
/// class-0 object; the score is how much of its box the region fills.
pub struct StubDetector {
    params: DecodeParams,
    labels: Labels,
    luma_threshold: u8,
    min_area: usize,
}

impl StubDetector {
    pub fn new(params: DecodeParams, labels: Labels) -> Self {
        Self {
            params,
            labels,
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
        }
    }

    pub fn with_luma_threshold(mut self, threshold: u8) -> Self {
        self.luma_threshold = threshold;
        self
    }

    fn bright_mask(&self, image: &ColorImage) -> Vec<bool> {
        image
            .pixels()
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]) >= self.luma_threshold)
            .collect()
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new(DecodeParams::default(), Labels::default())
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

/// 4-connected flood fill from `start`; returns `(area, [x1, y1, x2, y2])`
/// with exclusive max edges.
fn fill_region(mask: &mut [bool], width: usize, height: usize, start: usize) -> (usize, [usize; 4]) {
    let mut stack = vec![start];
    mask[start] = false;
    let mut area = 0;
    let mut bounds = [usize::MAX, usize::MAX, 0, 0];

    while let Some(idx) = stack.pop() {
        let (x, y) = (idx % width, idx / width);
        area += 1;
        bounds[0] = bounds[0].min(x);
        bounds[1] = bounds[1].min(y);
        bounds[2] = bounds[2].max(x + 1);
        bounds[3] = bounds[3].max(y + 1);

        let mut push = |n: usize| {
            if mask[n] {
                mask[n] = false;
                stack.push(n);
            }
        };
        if x > 0 {
            push(idx - 1);
        }
        if x + 1 < width {
            push(idx + 1);
        }
        if y > 0 {
            push(idx - width);
        }
        if y + 1 < height {
            push(idx + width);
        }
    }
    (area, bounds)
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&mut self) -> Result<(), ModelLoadError> {
        log::info!(
            "detector stub: ready (luma >= {}, conf >= {})",
            self.luma_threshold,
            self.params.conf_threshold
        );
        Ok(())
    }

    fn infer(&mut self, image: &ColorImage) -> Result<Vec<Detection>> {
        if !self.params.accepts_class(STUB_CLASS_ID) {
            return Ok(Vec::new());
        }
        let (width, height) = (image.width as usize, image.height as usize);
        let mut mask = self.bright_mask(image);

        let mut detections = Vec::new();
        for start in 0..mask.len() {
            if !mask[start] {
                continue;
            }
            let (area, [x1, y1, x2, y2]) = fill_region(&mut mask, width, height, start);
            if area < self.min_area {
                continue;
            }
            let box_area = (x2 - x1) * (y2 - y1);
            let score = area as f32 / box_area as f32;
            if score < self.params.conf_threshold {
                continue;
            }
            detections.push(Detection::new(
                [x1 as i32, y1 as i32, x2 as i32, y2 as i32],
                score,
                STUB_CLASS_ID,
                Some(
                    self.labels
                        .name(STUB_CLASS_ID)
                        .unwrap_or_else(|| "object".to_string()),
                ),
            ));
        }
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        detections.truncate(self.params.max_detections);
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_squares(squares: &[[u32; 4]]) -> ColorImage {
        let mut image = ColorImage::filled(64, 48, [10, 10, 10]);
        for &[x1, y1, x2, y2] in squares {
            for y in y1..y2 {
                for x in x1..x2 {
                    image.put_pixel(x, y, [250, 250, 250]);
                }
            }
        }
        image
    }

    #[test]
    fn finds_each_bright_region() -> Result<()> {
        let image = image_with_squares(&[[4, 4, 14, 14], [30, 20, 40, 30]]);
        let mut detector = StubDetector::default();
        detector.load()?;
        let mut dets = detector.infer(&image)?;
        dets.sort_by_key(|d| d.bbox[0]);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].bbox, [4, 4, 14, 14]);
        assert_eq!(dets[1].bbox, [30, 20, 40, 30]);
        assert_eq!(dets[0].score, 1.0);
        assert_eq!(dets[0].class_name.as_deref(), Some("object"));
        Ok(())
    }

    #[test]
    fn dark_image_has_no_detections() -> Result<()> {
        let mut detector = StubDetector::default();
        assert!(detector.infer(&image_with_squares(&[]))?.is_empty());
        Ok(())
    }

    #[test]
    fn ignores_specks_and_filtered_classes() -> Result<()> {
        let image = image_with_squares(&[[1, 1, 3, 3]]);
        let mut detector = StubDetector::default();
        assert!(detector.infer(&image)?.is_empty());

        let image = image_with_squares(&[[4, 4, 14, 14]]);
        let params = DecodeParams {
            classes: Some(vec![5]),
            ..DecodeParams::default()
        };
        let mut detector = StubDetector::new(params, Labels::default());
        assert!(detector.infer(&image)?.is_empty());
        Ok(())
    }

    #[test]
    fn uses_label_for_class_zero() -> Result<()> {
        let image = image_with_squares(&[[4, 4, 14, 14]]);
        let mut detector =
            StubDetector::new(DecodeParams::default(), Labels::new(vec!["box".into()]));
        let dets = detector.infer(&image)?;
        assert_eq!(dets[0].class_name.as_deref(), Some("box"));
        Ok(())
    }
}
