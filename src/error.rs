//! App error type for trim, waveform and sidecar commands. Implements Display and Serialize
//! so the sidecar can hand errors to the frontend unchanged.

use std::path::PathBuf;

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No encoder available for {format} (tried {})", .candidates.join(", "))]
    CodecUnavailable {
        format: String,
        candidates: Vec<String>,
    },

    #[error("Cannot open source file: {0}")]
    SourceUnavailable(String),

    #[error("Output file not created: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("MP3 encoder failed: {0}")]
    Mp3Encoder(String),

    #[error("Preferences error: {0}")]
    Preferences(String),

    #[error("Aborted")]
    Aborted,
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::FfmpegFailed {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
