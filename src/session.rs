//! Session state and its reducer.
//!
//! Every change to the session goes through [`reduce`]: a pure function from the
//! current state and one event to the next state. The controller owns the only
//! live copy and publishes it after each event.

use std::path::PathBuf;

use serde::Serialize;

use crate::ffmpeg::{MAX_SPEED, MIN_SPEED};
use crate::format::{OutputFormat, QualityPreset};
use crate::waveform::WaveformEnvelope;

/// Duration floor applied when the probe reports less (or nothing).
pub const MIN_SESSION_DURATION_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub source: Option<PathBuf>,
    pub file_name: String,
    pub duration_ms: u64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub output_format: OutputFormat,
    pub quality: QualityPreset,
    pub speed: f64,
    pub is_processing: bool,
    pub is_playing: bool,
    pub playback_position_ms: u64,
    pub waveform: WaveformEnvelope,
    pub trimmed_output: Option<PathBuf>,
    pub last_saved_path: Option<String>,
    pub message: Option<String>,
    pub show_full_screen_banner: bool,
    pub show_result_dialog: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            source: None,
            file_name: String::new(),
            duration_ms: 0,
            start_ms: 0,
            end_ms: 0,
            output_format: OutputFormat::Mp3,
            quality: QualityPreset::High,
            speed: 1.0,
            is_processing: false,
            is_playing: false,
            playback_position_ms: 0,
            waveform: WaveformEnvelope::default(),
            trimmed_output: None,
            last_saved_path: None,
            message: None,
            show_full_screen_banner: false,
            show_result_dialog: false,
        }
    }
}

impl SessionState {
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn clip_length_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FilePicked {
        source: PathBuf,
        file_name: String,
        duration_ms: u64,
    },
    RangeChanged {
        start_ms: u64,
        end_ms: u64,
    },
    FormatChanged(OutputFormat),
    QualityChanged(QualityPreset),
    SpeedChanged(f64),
    TrimStarted,
    TrimCancelled,
    TrimSucceeded {
        output: PathBuf,
        saved_path: String,
    },
    TrimFailed {
        message: String,
    },
    WaveformLoaded(WaveformEnvelope),
    PlaybackStarted,
    PlaybackPosition(u64),
    PlaybackStopped,
    PlaybackFailed {
        message: String,
    },
    MessageCleared,
    ResultDialogDismissed,
    BannerFinished,
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

pub fn reduce(state: &SessionState, event: SessionEvent) -> SessionState {
    let mut next = state.clone();
    match event {
        SessionEvent::FilePicked {
            source,
            file_name,
            duration_ms,
        } => {
            let duration = duration_ms.max(MIN_SESSION_DURATION_MS);
            next.message = Some(format!("File ready: {}", file_name));
            next.source = Some(source);
            next.file_name = file_name;
            next.duration_ms = duration;
            next.start_ms = 0;
            next.end_ms = duration;
            next.trimmed_output = None;
            next.waveform = WaveformEnvelope::default();
            next.playback_position_ms = 0;
            next.is_processing = false;
            next.is_playing = false;
            next.speed = 1.0;
        }
        SessionEvent::RangeChanged { start_ms, end_ms } => {
            let end = end_ms.min(state.duration_ms);
            next.end_ms = end;
            next.start_ms = start_ms.min(end);
        }
        SessionEvent::FormatChanged(format) => next.output_format = format,
        SessionEvent::QualityChanged(quality) => next.quality = quality,
        SessionEvent::SpeedChanged(speed) => next.speed = clamp_speed(speed),
        SessionEvent::TrimStarted => {
            next.is_processing = true;
            next.message = Some("Trimming...".to_string());
        }
        SessionEvent::TrimCancelled => {
            next.is_processing = false;
            next.message = Some("Trim cancelled".to_string());
        }
        SessionEvent::TrimSucceeded { output, saved_path } => {
            next.is_processing = false;
            next.trimmed_output = Some(output);
            next.playback_position_ms = state.start_ms;
            next.message = Some(format!("Saved to {}", saved_path));
            next.last_saved_path = Some(saved_path);
            next.show_full_screen_banner = true;
            next.show_result_dialog = false;
        }
        SessionEvent::TrimFailed { message } => {
            next.is_processing = false;
            next.message = Some(format!("Error: {}", message));
        }
        SessionEvent::WaveformLoaded(envelope) => {
            if envelope.is_empty() {
                next.message = Some("Waveform not available for this file".to_string());
            }
            next.waveform = envelope;
        }
        SessionEvent::PlaybackStarted => {
            next.is_playing = true;
            next.playback_position_ms = state.start_ms;
            next.message = Some("Preview playing".to_string());
        }
        SessionEvent::PlaybackPosition(ms) => {
            if state.is_playing {
                next.playback_position_ms = ms;
            }
        }
        SessionEvent::PlaybackStopped => {
            next.is_playing = false;
            next.playback_position_ms = state.start_ms;
        }
        SessionEvent::PlaybackFailed { message } => {
            next.is_playing = false;
            next.playback_position_ms = state.start_ms;
            next.message = Some(format!("Cannot play preview: {}", message));
        }
        SessionEvent::MessageCleared => next.message = None,
        SessionEvent::ResultDialogDismissed => next.show_result_dialog = false,
        SessionEvent::BannerFinished => {
            next.show_full_screen_banner = false;
            next.show_result_dialog = false;
        }
    }
    next
}
