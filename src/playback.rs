//! Preview playback of the selected range.
//!
//! [`FfplayPlayer`] plays through a headless `ffplay` child. Position is derived from a
//! monotonic clock scaled by speed, since ffplay reports nothing on its own.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::ffmpeg::discovery::get_ffplay_path;
use crate::ffmpeg::{format_seconds, path_to_string, tempo_filter};

/// Position sampling interval while previewing.
pub const POSITION_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Shortest auto-stop delay, so very short clips still sound.
pub const MIN_PREVIEW_MS: u64 = 300;

/// How long a preview of `[start_ms, end_ms)` at `speed` should run.
pub fn preview_length(start_ms: u64, end_ms: u64, speed: f64) -> Duration {
    let speed = if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        1.0
    };
    let raw = end_ms.saturating_sub(start_ms) as f64 / speed;
    Duration::from_millis((raw as u64).max(MIN_PREVIEW_MS))
}

/// Plays a range of a source file for preview.
pub trait PreviewPlayer: Send + Sync {
    fn start(&self, source: &Path, start_ms: u64, end_ms: u64, speed: f64)
    -> Result<(), AppError>;

    /// Current play-head in source milliseconds.
    fn position_ms(&self) -> u64;

    fn is_playing(&self) -> bool;

    fn stop(&self);
}

/// ffplay arguments: no window, exit at end, seek before decode.
pub fn build_ffplay_args(source: &str, start_ms: u64, end_ms: u64, speed: f64) -> Vec<String> {
    let mut args = vec![
        "-nodisp".to_string(),
        "-autoexit".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format_seconds(start_ms),
        "-t".to_string(),
        format_seconds(end_ms.saturating_sub(start_ms)),
    ];
    if let Some(filter) = tempo_filter(speed) {
        args.extend(["-af".to_string(), filter]);
    }
    args.push(source.to_string());
    args
}

struct Playing {
    child: Child,
    started: Instant,
    start_ms: u64,
    end_ms: u64,
    speed: f64,
}

impl Playing {
    fn position_ms(&self) -> u64 {
        let advanced = self.started.elapsed().as_secs_f64() * 1000.0 * self.speed;
        (self.start_ms + advanced as u64).min(self.end_ms)
    }
}

#[derive(Default)]
pub struct FfplayPlayer {
    current: Mutex<Option<Playing>>,
}

impl FfplayPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreviewPlayer for FfplayPlayer {
    fn start(
        &self,
        source: &Path,
        start_ms: u64,
        end_ms: u64,
        speed: f64,
    ) -> Result<(), AppError> {
        self.stop();
        let ffplay = get_ffplay_path()?;
        let args = build_ffplay_args(&path_to_string(source), start_ms, end_ms, speed);
        log::debug!(
            target: "audio_trim::playback",
            "Starting preview: {} {}..{}ms x{}",
            source.display(),
            start_ms,
            end_ms,
            speed
        );
        let mut cmd = Command::new(&ffplay);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        let child = cmd
            .spawn()
            .map_err(|e| AppError::from(format!("Failed to start ffplay: {}", e)))?;
        *self.current.lock() = Some(Playing {
            child,
            started: Instant::now(),
            start_ms,
            end_ms,
            speed: if speed.is_finite() && speed > 0.0 { speed } else { 1.0 },
        });
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        self.current
            .lock()
            .as_ref()
            .map(Playing::position_ms)
            .unwrap_or(0)
    }

    fn is_playing(&self) -> bool {
        let mut guard = self.current.lock();
        match guard.as_mut() {
            Some(playing) => !matches!(playing.child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    fn stop(&self) {
        if let Some(mut playing) = self.current.lock().take() {
            let _ = playing.child.kill();
            let _ = playing.child.wait();
            log::debug!(target: "audio_trim::playback", "Preview stopped");
        }
    }
}

impl Drop for FfplayPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
