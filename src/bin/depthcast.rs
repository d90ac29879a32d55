//! depthcast - RGB-D detection relay
//!
//! This binary:
//! 1. Loads configuration (file, then DEPTHCAST_* env, then CLI flags)
//! 2. Starts the camera and loads the detector
//! 3. Streams per-frame detection payloads to the enabled sinks
//! 4. Stops cleanly on Ctrl-C, or after one frame in single mode

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use depthcast::{AppConfig, CancellationToken, Pipeline, RunMode};

#[derive(Parser, Debug)]
#[command(
    name = "depthcast",
    version,
    about = "Stream 3D object detections from an RGB-D camera over UDP/TCP/EKI/MQTT"
)]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "DEPTHCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Run mode: realtime or single.
    #[arg(long)]
    mode: Option<RunMode>,

    /// Processing rate ceiling in realtime mode (<= 0 disables throttling).
    #[arg(long, allow_negative_numbers = true)]
    max_fps: Option<f64>,

    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        cfg.runtime.mode = mode;
    }
    if let Some(max_fps) = args.max_fps {
        cfg.runtime.max_fps = max_fps;
    }
    if let Some(level) = &args.log_level {
        cfg.logging.level = level.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = load_config(&args)?;
    depthcast::logging::init(&cfg.logging)?;
    log::info!(
        "depthcast {} starting (mode={}, max_fps={})",
        env!("CARGO_PKG_VERSION"),
        cfg.runtime.mode,
        cfg.runtime.max_fps
    );
    if cfg.runtime.mode == RunMode::Single {
        log::info!(
            "single-shot: skipping {} warm-up frames",
            cfg.runtime.warmup_frames
        );
    }

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let mut pipeline = Pipeline::from_config(&cfg)?;
    let result = pipeline.start().and_then(|_| pipeline.run(&token));
    pipeline.shutdown();

    let summary = result?;
    if summary.interrupted {
        log::info!("shutdown signal received, stopped cleanly");
    }
    Ok(())
}
