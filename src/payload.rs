//! Detection records and the per-frame wire payload.
//!
//! The payload is built once per frame and shared read-only by every sink.
//! JSON framing lives here; the XML document lives with its sink.

use serde::Serialize;

use crate::frame::FrameMetadata;
use crate::geometry::Point3;

/// Class id reported when the detector cannot name a class.
pub const UNKNOWN_CLASS_ID: i64 = -1;

/// One detected object in a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in source pixels.
    pub bbox: [i32; 4],
    pub score: f32,
    pub class_id: i64,
    pub class_name: Option<String>,
    /// Camera-space point in meters; `None` without reliable depth.
    pub xyz: Option<Point3>,
    /// `xyz` in the external frame; `None` without a usable transform.
    pub xyz_robot: Option<Point3>,
}

impl Detection {
    pub fn new(bbox: [i32; 4], score: f32, class_id: i64, class_name: Option<String>) -> Self {
        Self {
            bbox,
            score,
            class_id,
            class_name,
            xyz: None,
            xyz_robot: None,
        }
    }

    pub fn width(&self) -> i32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> i32 {
        self.bbox[3] - self.bbox[1]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub w: u32,
    pub h: u32,
}

/// Immutable snapshot sent downstream for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    /// Seconds since the Unix epoch.
    pub ts: f64,
    pub frame: FrameSize,
    /// Detections seen before truncation.
    pub num_detections: usize,
    pub detections: Vec<Detection>,
}

#[derive(Serialize)]
struct WirePayload<'a> {
    ts: f64,
    detections: &'a [Detection],
    frame: FrameSize,
}

impl Payload {
    /// JSON document with `ts` rounded to microseconds.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WirePayload {
            ts: round_to(self.ts, 6),
            detections: &self.detections,
            frame: self.frame,
        })
    }

    /// `to_json` followed by a single `\n`, for line-framed streams.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = self.to_json()?;
        line.push('\n');
        Ok(line)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Truncation policy applied when assembling a `Payload`.
#[derive(Clone, Copy, Debug)]
pub struct PayloadBuilder {
    max_detections: usize,
    first_only: bool,
}

impl PayloadBuilder {
    pub fn new(max_detections: usize) -> Self {
        Self {
            max_detections,
            first_only: false,
        }
    }

    pub fn with_first_only(mut self, first_only: bool) -> Self {
        self.first_only = first_only;
        self
    }

    pub fn build(&self, meta: FrameMetadata, detections: &[Detection]) -> Payload {
        build(
            meta.timestamp,
            FrameSize {
                w: meta.width,
                h: meta.height,
            },
            detections,
            self.max_detections,
            self.first_only,
        )
    }
}

/// Keep detector order; keep the first detection only, or at most
/// `max_detections`. `num_detections` always reports `detections.len()`.
pub fn build(
    ts: f64,
    frame: FrameSize,
    detections: &[Detection],
    max_detections: usize,
    first_only: bool,
) -> Payload {
    let keep = if first_only {
        detections.len().min(1)
    } else {
        detections.len().min(max_detections)
    };
    Payload {
        ts,
        frame,
        num_detections: detections.len(),
        detections: detections[..keep].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detections(n: usize) -> Vec<Detection> {
        (0..n)
            .map(|i| {
                let i = i as i32;
                Detection::new(
                    [i * 10, i * 10, i * 10 + 5, i * 10 + 5],
                    0.9 - i as f32 * 0.1,
                    i as i64,
                    Some(format!("class{i}")),
                )
            })
            .collect()
    }

    fn meta() -> FrameMetadata {
        FrameMetadata {
            timestamp: 1_700_000_000.123_456_789,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn first_only_keeps_one_and_reports_full_count() {
        let payload = PayloadBuilder::new(20)
            .with_first_only(true)
            .build(meta(), &detections(5));
        assert_eq!(payload.detections.len(), 1);
        assert_eq!(payload.num_detections, 5);
        assert_eq!(payload.detections[0].class_id, 0);
    }

    #[test]
    fn max_detections_truncates_in_order() {
        let payload = PayloadBuilder::new(2).build(meta(), &detections(5));
        assert_eq!(payload.detections.len(), 2);
        assert_eq!(payload.num_detections, 5);
        let ids: Vec<i64> = payload.detections.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn empty_detections_are_fine() {
        let payload = PayloadBuilder::new(2).with_first_only(true).build(meta(), &[]);
        assert!(payload.detections.is_empty());
        assert_eq!(payload.num_detections, 0);
    }

    #[test]
    fn json_uses_fixed_keys_and_order() {
        let mut dets = detections(1);
        dets[0].xyz = Some(Point3::new(0.5, -0.25, 1.0));
        let payload = build(
            12.345_678_9,
            FrameSize { w: 640, h: 480 },
            &dets,
            20,
            false,
        );
        let json = payload.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"ts":12.345679,"detections":[{"bbox":[0,0,5,5],"score":0.9,"class_id":0,"class_name":"class0","xyz":[0.5,-0.25,1.0],"xyz_robot":null}],"frame":{"w":640,"h":480}}"#
        );
    }

    #[test]
    fn json_line_ends_with_single_newline() {
        let payload = PayloadBuilder::new(20).build(meta(), &detections(2));
        let line = payload.to_json_line().unwrap();
        assert!(line.ends_with("}\n"));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["frame"]["w"], 640);
        assert_eq!(value["detections"].as_array().unwrap().len(), 2);
    }
}
