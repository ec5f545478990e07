//! FFprobe-based audio metadata extraction. Used on file pick to learn the
//! source duration before any trim range is set.

use crate::error::AppError;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use super::discovery::get_ffprobe_path;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

fn parse_u64(s: &str) -> Option<u64> {
    s.trim().parse().ok()
}

fn seconds_to_ms(s: &str) -> Option<u64> {
    let secs: f64 = s.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then(|| (secs * 1000.0).round() as u64)
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    /// Zero when ffprobe could not determine it.
    pub duration_ms: u64,
    pub size: u64,
    pub format_name: Option<String>,
    pub bit_rate: Option<u64>,
    pub codec_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

/// Parse ffprobe JSON output into AudioMetadata.
///
/// Duration comes from the container, or from the first audio stream when the
/// container does not report one (raw ADTS, some Ogg files).
pub fn parse_ffprobe_json(json: &str) -> Result<AudioMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let audio_stream = output
        .streams
        .as_ref()
        .and_then(|streams| streams.iter().find(|s| s.codec_type.as_deref() == Some("audio")));

    let duration_ms = format
        .and_then(|f| f.duration.as_deref())
        .and_then(seconds_to_ms)
        .or_else(|| {
            audio_stream
                .and_then(|s| s.duration.as_deref())
                .and_then(seconds_to_ms)
        })
        .unwrap_or(0);
    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(parse_u64)
        .unwrap_or(0);

    Ok(AudioMetadata {
        duration_ms,
        size,
        format_name: format.and_then(|f| f.format_name.clone()),
        bit_rate: format.and_then(|f| f.bit_rate.as_deref()).and_then(parse_u64),
        codec_name: audio_stream.and_then(|s| s.codec_name.clone()),
        sample_rate: audio_stream
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|s| s.trim().parse().ok()),
        channels: audio_stream.and_then(|s| s.channels),
    })
}

/// Run ffprobe on an audio file and return metadata.
pub fn get_audio_metadata(path: &Path) -> Result<AudioMetadata, AppError> {
    let ffprobe = get_ffprobe_path()?;
    let path_str = path.to_string_lossy();

    log::debug!(
        target: "audio_trim::ffmpeg::ffprobe",
        "get_audio_metadata: path={}",
        path_str
    );

    let mut cmd = Command::new(&ffprobe);
    cmd.args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        &path_str,
    ]);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let output = cmd
        .output()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::SourceUnavailable(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8"))?;

    parse_ffprobe_json(&json)
}
