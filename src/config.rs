use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::RunMode;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CAMERA_SOURCE: &str = "stub://camera";
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 480;
const DEFAULT_STREAM_FPS: u32 = 30;
const DEFAULT_DEPTH_SCALE: f64 = 0.001;
const DEFAULT_FOCAL_LENGTH: f64 = 615.0;
const DEFAULT_MODEL_PATH: &str = "models/yolov8n.onnx";
const DEFAULT_MODEL_BACKEND: &str = "stub";
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_FPS: f64 = 30.0;
const DEFAULT_WARMUP_FRAMES: u32 = 3;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 30;
const DEFAULT_MAX_DETECTIONS: usize = 20;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_UDP_PORT: u16 = 5005;
const DEFAULT_TCP_PORT: u16 = 6000;
const DEFAULT_EKI_PORT: u16 = 7000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1500;
const DEFAULT_EKI_ROOT_TAG: &str = "EKI";
const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_TOPIC: &str = "depthcast/detections";
const DEFAULT_MQTT_CLIENT_ID: &str = "depthcast";
const DEFAULT_SNAPSHOT_PATH: &str = "output/latest.jpg";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    logging: Option<LoggingConfigFile>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    runtime: Option<RuntimeConfigFile>,
    output: Option<OutputConfigFile>,
    calibration: Option<CalibrationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfigFile {
    level: Option<String>,
    file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    serial: Option<String>,
    color: Option<StreamConfigFile>,
    depth: Option<StreamConfigFile>,
    align_to_color: Option<bool>,
    depth_scale: Option<f64>,
    intrinsics: Option<IntrinsicsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IntrinsicsConfigFile {
    fx: f64,
    fy: f64,
    ppx: f64,
    ppy: f64,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    backend: Option<String>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    classes: Option<Vec<i64>>,
    labels: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RuntimeConfigFile {
    mode: Option<String>,
    max_fps: Option<f64>,
    warmup_frames: Option<u32>,
    compute_xyz: Option<bool>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    max_detections: Option<usize>,
    udp: Option<UdpConfigFile>,
    tcp: Option<TcpConfigFile>,
    eki: Option<EkiConfigFile>,
    mqtt: Option<MqttConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct UdpConfigFile {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct TcpConfigFile {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    newline: Option<bool>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EkiConfigFile {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    root_tag: Option<String>,
    only_first_detection: Option<bool>,
    use_robot_xyz: Option<bool>,
    pretty: Option<bool>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    enabled: Option<bool>,
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    draw: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    // Shape is checked by the pipeline, not here.
    #[serde(rename = "T_cam_to_robot")]
    cam_to_robot: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub logging: LoggingSettings,
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub runtime: RuntimeSettings,
    pub output: OutputSettings,
    pub calibration: CalibrationSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub serial: Option<String>,
    pub color: StreamSettings,
    pub depth: StreamSettings,
    pub align_to_color: bool,
    pub depth_scale: f64,
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub backend: String,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// `None` keeps every class.
    pub classes: Option<Vec<i64>>,
    pub labels: Option<PathBuf>,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub mode: RunMode,
    /// `<= 0` disables throttling.
    pub max_fps: f64,
    pub warmup_frames: u32,
    pub compute_xyz: bool,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub max_detections: usize,
    pub udp: UdpSettings,
    pub tcp: TcpSettings,
    pub eki: EkiSettings,
    pub mqtt: MqttSettings,
    pub snapshot: SnapshotSettings,
}

#[derive(Debug, Clone)]
pub struct UdpSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub newline: bool,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EkiSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub root_tag: String,
    pub only_first_detection: bool,
    pub use_robot_xyz: bool,
    pub pretty: bool,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub draw: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationSettings {
    /// 4 rows of 4 numbers or a flat row-major list of 16, kept as parsed.
    /// A malformed matrix only disables `xyz_robot`; see
    /// `RigidTransform::from_value`.
    pub cam_to_robot: Option<serde_json::Value>,
}

impl AppConfig {
    /// Load from `path` (or `DEPTHCAST_CONFIG`), apply env overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("DEPTHCAST_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON or TOML document without touching the environment.
    pub fn parse(raw: &str, format: ConfigFormat) -> Result<Self> {
        let file = parse_config(raw, format)?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let logging = file.logging.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let runtime = file.runtime.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let calibration = file.calibration.unwrap_or_default();

        let color = stream_settings(camera.color);
        let depth = stream_settings(camera.depth);
        let (fx, fy, ppx, ppy) = match camera.intrinsics {
            Some(intr) => (intr.fx, intr.fy, intr.ppx, intr.ppy),
            None => (
                DEFAULT_FOCAL_LENGTH,
                DEFAULT_FOCAL_LENGTH,
                color.width as f64 / 2.0,
                color.height as f64 / 2.0,
            ),
        };

        let mode = match runtime.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => RunMode::Realtime,
        };

        let udp = output.udp.unwrap_or_default();
        let tcp = output.tcp.unwrap_or_default();
        let eki = output.eki.unwrap_or_default();
        let mqtt = output.mqtt.unwrap_or_default();
        let snapshot = output.snapshot.unwrap_or_default();

        Ok(Self {
            logging: LoggingSettings {
                level: logging
                    .level
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
                file: logging.file,
            },
            camera: CameraSettings {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                serial: camera.serial.filter(|s| !s.trim().is_empty()),
                color,
                depth,
                align_to_color: camera.align_to_color.unwrap_or(true),
                depth_scale: camera.depth_scale.unwrap_or(DEFAULT_DEPTH_SCALE),
                fx,
                fy,
                ppx,
                ppy,
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                backend: model
                    .backend
                    .unwrap_or_else(|| DEFAULT_MODEL_BACKEND.to_string()),
                conf_threshold: model.conf_threshold.unwrap_or(DEFAULT_CONF_THRESHOLD),
                iou_threshold: model.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                classes: model.classes.filter(|c| !c.is_empty()),
                labels: model.labels,
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            runtime: RuntimeSettings {
                mode,
                max_fps: runtime.max_fps.unwrap_or(DEFAULT_MAX_FPS),
                warmup_frames: runtime.warmup_frames.unwrap_or(DEFAULT_WARMUP_FRAMES),
                compute_xyz: runtime.compute_xyz.unwrap_or(true),
                max_consecutive_failures: runtime
                    .max_consecutive_failures
                    .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            },
            output: OutputSettings {
                max_detections: output.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
                udp: UdpSettings {
                    enabled: udp.enabled.unwrap_or(true),
                    host: udp.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                    port: udp.port.unwrap_or(DEFAULT_UDP_PORT),
                },
                tcp: TcpSettings {
                    enabled: tcp.enabled.unwrap_or(false),
                    host: tcp.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                    port: tcp.port.unwrap_or(DEFAULT_TCP_PORT),
                    newline: tcp.newline.unwrap_or(true),
                    connect_timeout: Duration::from_millis(
                        tcp.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                    ),
                },
                eki: EkiSettings {
                    enabled: eki.enabled.unwrap_or(false),
                    host: eki.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                    port: eki.port.unwrap_or(DEFAULT_EKI_PORT),
                    root_tag: eki
                        .root_tag
                        .unwrap_or_else(|| DEFAULT_EKI_ROOT_TAG.to_string()),
                    only_first_detection: eki.only_first_detection.unwrap_or(true),
                    use_robot_xyz: eki.use_robot_xyz.unwrap_or(true),
                    pretty: eki.pretty.unwrap_or(false),
                    connect_timeout: Duration::from_millis(
                        eki.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                    ),
                },
                mqtt: MqttSettings {
                    enabled: mqtt.enabled.unwrap_or(false),
                    broker: mqtt
                        .broker
                        .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                    topic: mqtt.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                    client_id: mqtt
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                    username: mqtt.username,
                    password: mqtt.password,
                },
                snapshot: SnapshotSettings {
                    enabled: snapshot.enabled.unwrap_or(false),
                    path: snapshot
                        .path
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
                    draw: snapshot.draw.unwrap_or(true),
                },
            },
            calibration: CalibrationSettings {
                cam_to_robot: calibration.cam_to_robot,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(mode) = non_empty_env("DEPTHCAST_MODE") {
            self.runtime.mode = mode.parse()?;
        }
        if let Some(fps) = non_empty_env("DEPTHCAST_MAX_FPS") {
            self.runtime.max_fps = fps
                .parse()
                .map_err(|_| anyhow!("DEPTHCAST_MAX_FPS must be a number"))?;
        }
        if let Some(source) = non_empty_env("DEPTHCAST_CAMERA_SOURCE") {
            self.camera.source = source;
        }
        if let Some(path) = non_empty_env("DEPTHCAST_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(level) = non_empty_env("DEPTHCAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(addr) = non_empty_env("DEPTHCAST_UDP_ADDR") {
            let (host, port) =
                split_host_port(&addr).context("DEPTHCAST_UDP_ADDR must be host:port")?;
            self.output.udp.host = host;
            self.output.udp.port = port;
            self.output.udp.enabled = true;
        }
        if let Some(addr) = non_empty_env("DEPTHCAST_TCP_ADDR") {
            let (host, port) =
                split_host_port(&addr).context("DEPTHCAST_TCP_ADDR must be host:port")?;
            self.output.tcp.host = host;
            self.output.tcp.port = port;
            self.output.tcp.enabled = true;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.logging.level = self.logging.level.trim().to_lowercase();
        if !matches!(
            self.logging.level.as_str(),
            "off" | "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(anyhow!("unknown log level '{}'", self.logging.level));
        }

        let camera = &self.camera;
        if camera.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        for (name, stream) in [("color", camera.color), ("depth", camera.depth)] {
            if stream.width == 0 || stream.height == 0 {
                return Err(anyhow!("camera {} stream size must be non-zero", name));
            }
        }
        if !(camera.fx > 0.0 && camera.fy > 0.0) {
            return Err(anyhow!("camera focal lengths must be positive"));
        }
        if !(camera.depth_scale > 0.0) {
            return Err(anyhow!("camera depth_scale must be positive"));
        }

        let model = &self.model;
        for (name, value) in [
            ("conf_threshold", model.conf_threshold),
            ("iou_threshold", model.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("model {} must be within 0..1 (got {})", name, value));
            }
        }
        if model.input_size == 0 || model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input_size must be a positive multiple of 32 (got {})",
                model.input_size
            ));
        }

        if !self.runtime.max_fps.is_finite() {
            return Err(anyhow!("runtime max_fps must be finite"));
        }

        let output = &self.output;
        if output.max_detections == 0 {
            return Err(anyhow!("output max_detections must be greater than zero"));
        }
        for (name, enabled, host, port) in [
            ("udp", output.udp.enabled, &output.udp.host, output.udp.port),
            ("tcp", output.tcp.enabled, &output.tcp.host, output.tcp.port),
            ("eki", output.eki.enabled, &output.eki.host, output.eki.port),
        ] {
            if enabled && (host.trim().is_empty() || port == 0) {
                return Err(anyhow!("output {} needs a host and a non-zero port", name));
            }
        }
        if output.eki.enabled && !is_xml_name(&output.eki.root_tag) {
            return Err(anyhow!(
                "eki root_tag '{}' is not a valid XML element name",
                output.eki.root_tag
            ));
        }
        if output.mqtt.enabled {
            let topic = &output.mqtt.topic;
            if topic.is_empty() || topic.contains(['+', '#']) {
                return Err(anyhow!("mqtt topic '{}' must be a plain topic name", topic));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    parse_config(&raw, ConfigFormat::from_path(path))
        .with_context(|| format!("invalid config file {}", path.display()))
}

fn parse_config(raw: &str, format: ConfigFormat) -> Result<ConfigFile> {
    let cfg = match format {
        ConfigFormat::Json => serde_json::from_str(raw)?,
        ConfigFormat::Toml => toml::from_str(raw)?,
    };
    Ok(cfg)
}

fn stream_settings(file: Option<StreamConfigFile>) -> StreamSettings {
    let file = file.unwrap_or_default();
    StreamSettings {
        width: file.width.unwrap_or(DEFAULT_STREAM_WIDTH),
        height: file.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
        fps: file.fps.unwrap_or(DEFAULT_STREAM_FPS),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Split `host:port` or `[v6]:port`.
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing port in {}", addr))?;
        let port: u16 = port.parse().context("invalid port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing port in {}", addr))?;
    let port: u16 = port.parse().context("invalid port")?;
    Ok((host.to_string(), port))
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("xml")) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::parse("{}", ConfigFormat::Json).unwrap();
        assert_eq!(cfg.runtime.mode, RunMode::Realtime);
        assert_eq!(cfg.runtime.warmup_frames, 3);
        assert_eq!(cfg.runtime.max_fps, 30.0);
        assert!(cfg.output.udp.enabled);
        assert!(!cfg.output.tcp.enabled);
        assert_eq!(cfg.output.eki.root_tag, "EKI");
        assert!(cfg.output.eki.only_first_detection);
        assert_eq!(cfg.output.max_detections, 20);
        assert_eq!(cfg.camera.ppx, 320.0);
        assert!(cfg.calibration.cam_to_robot.is_none());
    }

    #[test]
    fn toml_document_parses() {
        let raw = r#"
            [runtime]
            mode = "single"
            warmup_frames = 5

            [output.eki]
            enabled = true
            root_tag = "Robot"
            pretty = true

            [calibration]
            T_cam_to_robot = [[1.0, 0.0, 0.0, 0.1], [0.0, 1.0, 0.0, 0.2], [0.0, 0.0, 1.0, 0.3], [0.0, 0.0, 0.0, 1.0]]
        "#;
        let cfg = AppConfig::parse(raw, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.runtime.mode, RunMode::Single);
        assert_eq!(cfg.runtime.warmup_frames, 5);
        assert!(cfg.output.eki.enabled);
        assert_eq!(cfg.output.eki.root_tag, "Robot");
        assert!(cfg.output.eki.pretty);
        assert_eq!(cfg.calibration.cam_to_robot.unwrap()[2][3], 0.3);
    }

    #[test]
    fn odd_calibration_shapes_still_load() {
        let flat = r#"{"calibration": {"T_cam_to_robot": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]}}"#;
        let cfg = AppConfig::parse(flat, ConfigFormat::Json).unwrap();
        assert_eq!(
            cfg.calibration.cam_to_robot.as_ref().and_then(|v| v.as_array()).map(Vec::len),
            Some(16)
        );

        let text_cell = r#"{"calibration": {"T_cam_to_robot": [[1,0,0,0],[0,1,0,"x"],[0,0,1,0],[0,0,0,1]]}}"#;
        assert!(AppConfig::parse(text_cell, ConfigFormat::Json).is_ok());

        let toml_flat = "[calibration]\nT_cam_to_robot = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]\n";
        assert!(AppConfig::parse(toml_flat, ConfigFormat::Toml).is_ok());
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = AppConfig::parse(r#"{"runtime": {"mode": "batch"}}"#, ConfigFormat::Json)
            .unwrap_err();
        assert!(format!("{err:#}").contains("batch"));
    }

    #[test]
    fn rejects_invalid_root_tag() {
        let raw = r#"{"output": {"eki": {"enabled": true, "root_tag": "1bad"}}}"#;
        assert!(AppConfig::parse(raw, ConfigFormat::Json).is_err());
    }

    #[test]
    fn rejects_zero_port_on_enabled_sink() {
        let raw = r#"{"output": {"tcp": {"enabled": true, "port": 0}}}"#;
        assert!(AppConfig::parse(raw, ConfigFormat::Json).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let raw = r#"{"model": {"conf_threshold": 1.5}}"#;
        assert!(AppConfig::parse(raw, ConfigFormat::Json).is_err());
    }

    #[test]
    fn split_host_port_handles_ipv6() {
        assert_eq!(
            split_host_port("[::1]:6000").unwrap(),
            ("::1".to_string(), 6000)
        );
        assert_eq!(
            split_host_port("robot.local:7000").unwrap(),
            ("robot.local".to_string(), 7000)
        );
        assert!(split_host_port("no-port").is_err());
    }

    #[test]
    fn xml_names() {
        assert!(is_xml_name("EKI"));
        assert!(is_xml_name("_root-1.a"));
        assert!(!is_xml_name(""));
        assert!(!is_xml_name("9abc"));
        assert!(!is_xml_name("has space"));
        assert!(!is_xml_name("xmlRoot"));
    }
}
