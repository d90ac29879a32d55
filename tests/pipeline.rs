use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use depthcast::config::{AppConfig, ConfigFormat};
use depthcast::{CancellationToken, Pipeline, RunMode};
use serde_json::json;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// Small synthetic stream, no pacing, no throttling, every sink off.
fn bench_config(source: &str) -> AppConfig {
    let mut cfg = AppConfig::parse("{}", ConfigFormat::Json).unwrap();
    cfg.camera.source = source.to_string();
    cfg.camera.color.width = 160;
    cfg.camera.color.height = 120;
    cfg.camera.color.fps = 0;
    cfg.camera.fx = 200.0;
    cfg.camera.fy = 200.0;
    cfg.camera.ppx = 80.0;
    cfg.camera.ppy = 60.0;
    cfg.runtime.max_fps = 0.0;
    cfg.output.udp.enabled = false;
    cfg
}

#[test]
fn single_shot_prints_one_payload_after_warmup() {
    let mut cfg = bench_config("stub://bench?frames=50");
    cfg.runtime.mode = RunMode::Single;
    cfg.runtime.warmup_frames = 4;

    let out = Captured::default();
    let mut pipeline = Pipeline::from_config(&cfg)
        .unwrap()
        .with_payload_output(Box::new(out.clone()));
    pipeline.start().unwrap();
    let summary = pipeline.run(&CancellationToken::new()).unwrap();
    pipeline.shutdown();

    assert_eq!(summary.warmup_skipped, 4);
    assert_eq!(summary.frames_processed, 1);
    assert_eq!(summary.frames_seen, 5);
    assert!(!summary.interrupted);

    let text = out.text();
    assert_eq!(text.matches('\n').count(), 1);
    let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
    assert_eq!(value["frame"]["w"], 160);
    assert_eq!(value["frame"]["h"], 120);

    let detections = value["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1);
    let det = &detections[0];
    assert_eq!(det["class_id"], 0);
    let z = det["xyz"][2].as_f64().unwrap();
    assert!((z - 0.8).abs() < 1e-9, "z = {z}");
    assert!(det["xyz_robot"].is_null());
}

#[test]
fn calibration_fills_robot_coordinates() {
    let mut cfg = bench_config("stub://bench?frames=5");
    cfg.runtime.mode = RunMode::Single;
    cfg.runtime.warmup_frames = 0;
    cfg.calibration.cam_to_robot = Some(json!([
        [1.0, 0.0, 0.0, 0.5],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, -0.3],
        [0.0, 0.0, 0.0, 1.0],
    ]));

    let out = Captured::default();
    let mut pipeline = Pipeline::from_config(&cfg)
        .unwrap()
        .with_payload_output(Box::new(out.clone()));
    assert!(pipeline.has_transform());
    pipeline.start().unwrap();
    pipeline.run(&CancellationToken::new()).unwrap();
    pipeline.shutdown();

    let value: serde_json::Value = serde_json::from_str(out.text().trim_end()).unwrap();
    let det = &value["detections"][0];
    let cam_x = det["xyz"][0].as_f64().unwrap();
    let robot_x = det["xyz_robot"][0].as_f64().unwrap();
    let robot_z = det["xyz_robot"][2].as_f64().unwrap();
    assert!((robot_x - (cam_x + 0.5)).abs() < 1e-9);
    assert!((robot_z - 0.5).abs() < 1e-9);
}

#[test]
fn flat_or_broken_calibration_does_not_stop_the_run() {
    let flat = r#"{"calibration": {"T_cam_to_robot": [1,0,0,0, 0,1,0,0, 0,0,1,0.25, 0,0,0,1]}}"#;
    let broken = r#"{"calibration": {"T_cam_to_robot": [[1,0,0,0],[0,1,0,0],[0,0,1,"x"],[0,0,0,1]]}}"#;

    for (raw, expect_robot) in [(flat, true), (broken, false)] {
        let parsed =
            AppConfig::parse(raw, ConfigFormat::Json).expect("calibration never fails config");
        let mut cfg = bench_config("stub://bench?frames=3");
        cfg.calibration = parsed.calibration;
        cfg.runtime.mode = RunMode::Single;
        cfg.runtime.warmup_frames = 0;

        let out = Captured::default();
        let mut pipeline = Pipeline::from_config(&cfg)
            .unwrap()
            .with_payload_output(Box::new(out.clone()));
        assert_eq!(pipeline.has_transform(), expect_robot);
        pipeline.start().unwrap();
        let summary = pipeline.run(&CancellationToken::new()).unwrap();
        pipeline.shutdown();
        assert_eq!(summary.frames_processed, 1);

        let value: serde_json::Value = serde_json::from_str(out.text().trim_end()).unwrap();
        let det = &value["detections"][0];
        assert!(det["xyz"].is_array());
        if expect_robot {
            let z = det["xyz_robot"][2].as_f64().unwrap();
            assert!((z - 1.05).abs() < 1e-9, "z = {z}");
        } else {
            assert!(det["xyz_robot"].is_null());
        }
    }
}

#[test]
fn realtime_streams_every_frame_over_udp_and_tcp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let udp_port = receiver.local_addr().unwrap().port();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let reader = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        BufReader::new(stream)
            .lines()
            .map(|line| line.unwrap())
            .collect::<Vec<_>>()
    });

    let mut cfg = bench_config("stub://bench?frames=3");
    cfg.output.udp.enabled = true;
    cfg.output.udp.port = udp_port;
    cfg.output.tcp.enabled = true;
    cfg.output.tcp.port = tcp_port;

    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.start().unwrap();
    let summary = pipeline.run(&CancellationToken::new()).unwrap();
    pipeline.shutdown();

    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.payloads_sent, 6);
    assert_eq!(summary.sink_failures, 0);

    let mut buf = [0u8; 65_536];
    for _ in 0..3 {
        let n = receiver.recv(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(value["detections"].as_array().unwrap().len(), 1);
    }

    let lines = reader.join().unwrap();
    assert_eq!(lines.len(), 3);
    let xs: Vec<i64> = lines
        .iter()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["detections"][0]["bbox"][0].as_i64().unwrap()
        })
        .collect();
    assert!(xs.windows(2).all(|w| w[0] < w[1]), "target drifts: {xs:?}");
}

#[test]
fn unreachable_tcp_sink_does_not_stop_other_sinks() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Reserve a port, then free it so connects are refused.
    let closed_port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut cfg = bench_config("stub://bench?frames=2");
    cfg.output.udp.enabled = true;
    cfg.output.udp.port = receiver.local_addr().unwrap().port();
    cfg.output.tcp.enabled = true;
    cfg.output.tcp.port = closed_port;
    cfg.output.tcp.connect_timeout = Duration::from_millis(200);

    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.start().unwrap();
    let summary = pipeline.run(&CancellationToken::new()).unwrap();
    pipeline.shutdown();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.payloads_sent, 2);
    assert_eq!(summary.sink_failures, 2);

    let mut buf = [0u8; 65_536];
    assert!(receiver.recv(&mut buf).unwrap() > 0);
}

#[test]
fn dropped_frames_are_skipped_not_fatal() {
    let cfg = bench_config("stub://bench?frames=6&drop_every=3");

    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.start().unwrap();
    let summary = pipeline.run(&CancellationToken::new()).unwrap();
    pipeline.shutdown();

    assert_eq!(summary.acquisition_failures, 2);
    assert_eq!(summary.frames_processed, 4);
}

#[test]
fn persistent_acquisition_failure_ends_the_run() {
    let mut cfg = bench_config("stub://bench?drop_every=1");
    cfg.runtime.max_consecutive_failures = 3;

    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.start().unwrap();
    let err = pipeline.run(&CancellationToken::new()).unwrap_err();
    pipeline.shutdown();
    assert!(err.to_string().contains("3 frames in a row"));
}

#[test]
fn cancelled_token_stops_before_the_first_frame() {
    let cfg = bench_config("stub://bench");
    let token = CancellationToken::new();
    token.cancel();

    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.start().unwrap();
    let summary = pipeline.run(&token).unwrap();
    pipeline.shutdown();
    pipeline.shutdown();

    assert!(summary.interrupted);
    assert_eq!(summary.frames_seen, 0);
}

#[test]
fn run_requires_start() {
    let cfg = bench_config("stub://bench?frames=1");
    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    assert!(pipeline.run(&CancellationToken::new()).is_err());
}

#[test]
fn unknown_backend_fails_construction() {
    let mut cfg = bench_config("stub://bench");
    cfg.model.backend = "magic".to_string();
    assert!(Pipeline::from_config(&cfg).is_err());
}
