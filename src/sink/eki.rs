//! XML document sink for KUKA EKI receivers.
//!
//! The element layout has to match the EKI XML config on the controller.
//! Compact output carries no declaration; pretty output adds one and indents
//! by two spaces.

use std::fmt::Write as _;

use crate::error::TransportError;
use crate::geometry::Point3;
use crate::payload::{Detection, Payload};

use super::tcp::{NetworkTextSink, StreamConnector, TcpConnector};
use super::{SendOutcome, Sink};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

#[derive(Clone, Debug)]
pub struct EkiOptions {
    pub root_tag: String,
    pub only_first_detection: bool,
    pub use_robot_xyz: bool,
    pub pretty: bool,
}

impl Default for EkiOptions {
    fn default() -> Self {
        Self {
            root_tag: "EKI".to_string(),
            only_first_detection: true,
            use_robot_xyz: true,
            pretty: false,
        }
    }
}

pub struct StructuredDocumentSink<C: StreamConnector = TcpConnector> {
    text: NetworkTextSink<C>,
    options: EkiOptions,
}

impl<C: StreamConnector> StructuredDocumentSink<C> {
    pub fn new(connector: C, options: EkiOptions) -> Self {
        Self {
            text: NetworkTextSink::new("eki", connector).with_newline(false),
            options,
        }
    }

    pub fn options(&self) -> &EkiOptions {
        &self.options
    }
}

impl<C: StreamConnector> Sink for StructuredDocumentSink<C> {
    fn name(&self) -> &str {
        "eki"
    }

    fn send(&mut self, payload: &Payload) -> Result<SendOutcome, TransportError> {
        let document = render_document(payload, &self.options);
        let outcome = self.text.send_text(&document);
        log::debug!("eki: xml sent: {} chars ({:?})", document.len(), outcome);
        Ok(outcome)
    }

    fn close(&mut self) {
        self.text.close();
    }
}

/// Render the EKI document for one payload.
///
/// `NumDet` is the pre-truncation count; `only_first_detection` trims the
/// already truncated list further.
pub fn render_document(payload: &Payload, options: &EkiOptions) -> String {
    let mut xml = XmlWriter::new(options.pretty);
    xml.open(&options.root_tag);
    xml.leaf("TS", &format!("{:.6}", payload.ts));
    xml.leaf("FrameW", &payload.frame.w.to_string());
    xml.leaf("FrameH", &payload.frame.h.to_string());
    xml.leaf("NumDet", &payload.num_detections.to_string());

    let detections = if options.only_first_detection {
        &payload.detections[..payload.detections.len().min(1)]
    } else {
        &payload.detections[..]
    };

    if detections.is_empty() {
        xml.empty("Detections");
    } else {
        xml.open("Detections");
        for (i, det) in detections.iter().enumerate() {
            xml.open(&format!("Det{i}"));
            write_detection(&mut xml, det, options.use_robot_xyz);
            xml.close();
        }
        xml.close();
    }
    xml.close();
    xml.finish()
}

fn write_detection(xml: &mut XmlWriter, det: &Detection, use_robot_xyz: bool) {
    xml.leaf("Cls", &det.class_id.to_string());
    xml.leaf("Score", &format!("{:.4}", det.score));
    for (tag, value) in ["X1", "Y1", "X2", "Y2"].iter().zip(det.bbox) {
        xml.leaf(tag, &value.to_string());
    }

    let point = select_point(det, use_robot_xyz);
    let coords = point.map(|p| p.to_array());
    for (i, tag) in ["X", "Y", "Z"].iter().enumerate() {
        match coords {
            Some(c) => xml.leaf(tag, &format!("{:.6}", c[i])),
            None => xml.leaf(tag, "NaN"),
        }
    }
}

fn select_point(det: &Detection, use_robot_xyz: bool) -> Option<Point3> {
    match (use_robot_xyz, det.xyz_robot) {
        (true, Some(robot)) => Some(robot),
        _ => det.xyz,
    }
}

/// Minimal element writer. Tag names come from code or validated config;
/// only text content is escaped.
struct XmlWriter {
    out: String,
    stack: Vec<String>,
    pretty: bool,
}

impl XmlWriter {
    fn new(pretty: bool) -> Self {
        let mut out = String::new();
        if pretty {
            out.push_str(XML_DECLARATION);
            out.push('\n');
        }
        Self {
            out,
            stack: Vec::new(),
            pretty,
        }
    }

    fn indent(&mut self) {
        if self.pretty {
            for _ in 0..self.stack.len() {
                self.out.push_str("  ");
            }
        }
    }

    fn line_end(&mut self) {
        if self.pretty {
            self.out.push('\n');
        }
    }

    fn open(&mut self, tag: &str) {
        self.indent();
        let _ = write!(self.out, "<{tag}>");
        self.line_end();
        self.stack.push(tag.to_string());
    }

    fn close(&mut self) {
        if let Some(tag) = self.stack.pop() {
            self.indent();
            let _ = write!(self.out, "</{tag}>");
            self.line_end();
        }
    }

    fn empty(&mut self, tag: &str) {
        self.indent();
        let _ = write!(self.out, "<{tag} />");
        self.line_end();
    }

    fn leaf(&mut self, tag: &str, text: &str) {
        self.indent();
        let _ = write!(self.out, "<{tag}>{}</{tag}>", escape_text(text));
        self.line_end();
    }

    fn finish(mut self) -> String {
        while !self.stack.is_empty() {
            self.close();
        }
        self.out
    }
}

fn escape_text(text: &str) -> std::borrow::Cow<'_, str> {
    if !text.contains(['&', '<', '>']) {
        return std::borrow::Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    std::borrow::Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{build, FrameSize};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn detection(class_id: i64, xyz: Option<Point3>, robot: Option<Point3>) -> Detection {
        let mut det = Detection::new([10, 20, 30, 40], 0.87654, class_id, None);
        det.xyz = xyz;
        det.xyz_robot = robot;
        det
    }

    fn payload(dets: &[Detection]) -> Payload {
        build(1700000000.5, FrameSize { w: 640, h: 480 }, dets, 20, false)
    }

    fn compact(first_only: bool, robot: bool) -> EkiOptions {
        EkiOptions {
            only_first_detection: first_only,
            use_robot_xyz: robot,
            ..EkiOptions::default()
        }
    }

    #[test]
    fn renders_compact_document() {
        let dets = [detection(2, Some(Point3::new(0.1, 0.2, 0.75)), None)];
        let xml = render_document(&payload(&dets), &compact(true, true));
        assert_eq!(
            xml,
            "<EKI><TS>1700000000.500000</TS><FrameW>640</FrameW><FrameH>480</FrameH>\
             <NumDet>1</NumDet><Detections><Det0><Cls>2</Cls><Score>0.8765</Score>\
             <X1>10</X1><Y1>20</Y1><X2>30</X2><Y2>40</Y2>\
             <X>0.100000</X><Y>0.200000</Y><Z>0.750000</Z></Det0></Detections></EKI>"
        );
    }

    #[test]
    fn num_det_keeps_full_count_with_first_only() {
        let dets: Vec<Detection> = (0..5).map(|i| detection(i, None, None)).collect();
        let xml = render_document(&payload(&dets), &compact(true, true));
        assert!(xml.contains("<NumDet>5</NumDet>"));
        assert!(xml.contains("<Det0>"));
        assert!(!xml.contains("<Det1>"));

        let xml = render_document(&payload(&dets), &compact(false, true));
        assert!(xml.contains("<Det4>"));
    }

    #[test]
    fn missing_point_is_nan() {
        let xml = render_document(&payload(&[detection(0, None, None)]), &compact(true, true));
        assert!(xml.contains("<X>NaN</X><Y>NaN</Y><Z>NaN</Z>"));
    }

    #[test]
    fn robot_coordinates_preferred_when_enabled() {
        let det = detection(
            0,
            Some(Point3::new(1.0, 1.0, 1.0)),
            Some(Point3::new(2.0, 3.0, 4.0)),
        );
        let xml = render_document(&payload(&[det.clone()]), &compact(true, true));
        assert!(xml.contains("<X>2.000000</X><Y>3.000000</Y><Z>4.000000</Z>"));

        let xml = render_document(&payload(&[det]), &compact(true, false));
        assert!(xml.contains("<X>1.000000</X>"));

        // Falls back to camera space when the robot point is missing.
        let det = detection(0, Some(Point3::new(1.0, 1.0, 1.0)), None);
        let xml = render_document(&payload(&[det]), &compact(true, true));
        assert!(xml.contains("<X>1.000000</X>"));
    }

    #[test]
    fn empty_detections_render_self_closing_container() {
        let xml = render_document(&payload(&[]), &compact(true, true));
        assert!(xml.contains("<NumDet>0</NumDet><Detections /></EKI>"));
    }

    #[test]
    fn pretty_output_indents_and_declares() {
        let options = EkiOptions {
            pretty: true,
            root_tag: "Robot".to_string(),
            ..EkiOptions::default()
        };
        let xml = render_document(&payload(&[detection(1, None, None)]), &options);
        let lines: Vec<&str> = xml.lines().collect();
        assert_eq!(lines[0], XML_DECLARATION);
        assert_eq!(lines[1], "<Robot>");
        assert_eq!(lines[2], "  <TS>1700000000.500000</TS>");
        assert!(lines.contains(&"    <Det0>"));
        assert!(lines.contains(&"      <Cls>1</Cls>"));
        assert_eq!(*lines.last().unwrap(), "</Robot>");
    }

    #[test]
    fn escapes_text_content() {
        assert_eq!(escape_text("a<b&c>"), "a&lt;b&amp;c&gt;");
        assert!(matches!(escape_text("plain"), std::borrow::Cow::Borrowed(_)));
    }

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct CaptureConnector(Arc<Mutex<Vec<u8>>>);

    impl StreamConnector for CaptureConnector {
        type Stream = Capture;

        fn connect(&mut self) -> Result<Capture, TransportError> {
            Ok(Capture(self.0.clone()))
        }

        fn target(&self) -> &str {
            "capture:0"
        }
    }

    #[test]
    fn sends_document_without_newline() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut sink =
            StructuredDocumentSink::new(CaptureConnector(received.clone()), EkiOptions::default());
        let p = payload(&[detection(0, None, None)]);
        assert_eq!(sink.send(&p).unwrap(), SendOutcome::Delivered);
        let sent = String::from_utf8(received.lock().unwrap().clone()).unwrap();
        assert_eq!(sent, render_document(&p, &EkiOptions::default()));
        assert!(!sent.ends_with('\n'));
    }
}
