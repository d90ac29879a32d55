//! Frame pacing and the run-mode state machine.
//!
//! The scheduler never sleeps or buffers. It only decides, per incoming
//! frame, whether the orchestrator should process it.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Continuous streaming, rate gated by `max_fps`.
    Realtime,
    /// Warm up, process exactly one frame, stop.
    Single,
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "realtime" => Ok(RunMode::Realtime),
            "single" => Ok(RunMode::Single),
            other => Err(anyhow!(
                "unknown run mode '{}' (expected realtime or single)",
                other
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Realtime => f.write_str("realtime"),
            RunMode::Single => f.write_str("single"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// Frames left to discard before the single capture.
    Warmup(u32),
    Steady,
    /// Single-shot capture done; no more frames are admitted.
    Finished,
}

/// Decision for one incoming frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Warmup,
    Throttled,
    Process,
    Finished,
}

#[derive(Clone, Debug)]
pub struct FrameScheduler {
    mode: RunMode,
    state: SchedulerState,
    min_interval: Option<Duration>,
    last_processed: Option<Duration>,
}

impl FrameScheduler {
    pub fn new(mode: RunMode, max_fps: f64, warmup_frames: u32) -> Self {
        let state = match mode {
            RunMode::Single if warmup_frames > 0 => SchedulerState::Warmup(warmup_frames),
            _ => SchedulerState::Steady,
        };
        let min_interval = match mode {
            RunMode::Realtime if max_fps > 0.0 => Some(Duration::from_nanos(
                (1_000_000_000.0 / max_fps).round() as u64,
            )),
            _ => None,
        };
        Self {
            mode,
            state,
            min_interval,
            last_processed: None,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Decide on a frame arriving at `now` (monotonic, any fixed origin).
    ///
    /// `Process` in realtime mode records `now` as the last processed time.
    pub fn admit(&mut self, now: Duration) -> Admission {
        match self.state {
            SchedulerState::Finished => Admission::Finished,
            SchedulerState::Warmup(remaining) => {
                self.state = if remaining > 1 {
                    SchedulerState::Warmup(remaining - 1)
                } else {
                    SchedulerState::Steady
                };
                Admission::Warmup
            }
            SchedulerState::Steady => {
                if let (Some(interval), Some(last)) = (self.min_interval, self.last_processed) {
                    if now.saturating_sub(last) < interval {
                        return Admission::Throttled;
                    }
                }
                self.last_processed = Some(now);
                Admission::Process
            }
        }
    }

    /// Mark the admitted frame as fully handled. Returns true when the loop
    /// should stop.
    pub fn complete(&mut self) -> bool {
        if self.mode == RunMode::Single {
            self.state = SchedulerState::Finished;
            return true;
        }
        false
    }
}
