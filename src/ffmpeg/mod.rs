mod builder;
pub mod capabilities;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod temp;
mod verify;

pub use builder::{
    DECODE_CHANNELS, DECODE_SAMPLE_RATE, ENVELOPE_SAMPLE_RATE, build_envelope_decode_args,
    build_pcm_decode_args, build_tempo_chain, build_trim_arguments, codec_args,
    format_args_for_display_multiline, format_seconds, join_command_line, select_encoder,
    tempo_filter,
};
pub use capabilities::{EncoderCapabilities, get_supported_encoders};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use progress::{ProgressLine, ProgressTracker, parse_progress_line};
pub use runner::{AbortHandle, ProgressCallback, run_ffmpeg_blocking};
pub use temp::{ScratchFile, cleanup_old_temp_files, scratch_dir};
#[cfg(any(test, feature = "integration-test-api"))]
pub use verify::verify_audio;
pub use verify::verify_output;

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::AppError;
use crate::format::{OutputFormat, QualityPreset};

/// Slowest playback multiplier accepted for a trim.
pub const MIN_SPEED: f64 = 0.1;
/// Fastest playback multiplier accepted for a trim.
pub const MAX_SPEED: f64 = 4.0;

/// Progress payload forwarded to the sidecar as `media.job.progress`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegProgressPayload {
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// One trim job: which part of which source to encode, and how.
#[derive(Debug, Deserialize, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRequest {
    pub source: PathBuf,
    pub start_ms: u64,
    pub end_ms: u64,
    pub format: OutputFormat,
    #[serde(default)]
    pub quality: QualityPreset,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

impl TrimRequest {
    pub fn new(source: impl Into<PathBuf>, start_ms: u64, end_ms: u64, format: OutputFormat) -> Self {
        Self {
            source: source.into(),
            start_ms,
            end_ms,
            format,
            quality: QualityPreset::default(),
            speed: 1.0,
        }
    }

    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Rejects requests that must never reach the engine.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.end_ms <= self.start_ms {
            return Err(AppError::invalid_request(
                "End time must be greater than start time",
            ));
        }
        if !self.speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            return Err(AppError::invalid_request(format!(
                "Speed must be between {} and {} (got {})",
                MIN_SPEED, MAX_SPEED, self.speed
            )));
        }
        Ok(())
    }

    pub fn clip_duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Length of the produced file once the tempo chain is applied.
    pub fn output_duration_secs(&self) -> f64 {
        let speed = if self.speed.is_finite() && self.speed > 0.0 {
            self.speed
        } else {
            1.0
        };
        self.clip_duration_ms() as f64 / 1000.0 / speed
    }
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
