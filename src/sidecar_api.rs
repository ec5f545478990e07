//! Typed operations behind the sidecar's JSON-lines methods.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::controller::{FfmpegBackend, SessionController};
use crate::error::AppError;
use crate::ffmpeg::ffprobe::{AudioMetadata, get_audio_metadata};
use crate::ffmpeg::{
    TrimRequest, cleanup_old_temp_files, format_args_for_display_multiline, join_command_line,
    path_to_string,
};
use crate::format::FormatInfo;
use crate::paths::clip_file_name;
use crate::playback::FfplayPlayer;
use crate::trim::TrimProcessor;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub encoders: Vec<String>,
    pub formats: Vec<FormatInfo>,
    pub native_mp3: bool,
}

pub fn app_capabilities(processor: &TrimProcessor) -> AppCapabilitiesResult {
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        encoders: processor.encoders().as_set().iter().cloned().collect(),
        formats: processor
            .supported_formats()
            .into_iter()
            .map(|f| f.info())
            .collect(),
        native_mp3: processor.native_mp3_available(),
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadataResult {
    file_name: String,
    duration_ms: u64,
    size: u64,
    size_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u32>,
}

impl AudioMetadataResult {
    fn from_meta(path: &Path, meta: AudioMetadata) -> Self {
        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_to_string(path)),
            duration_ms: meta.duration_ms,
            size: meta.size,
            size_mb: meta.size as f64 / (1024.0 * 1024.0),
            format_name: meta.format_name,
            bit_rate: meta.bit_rate,
            codec_name: meta.codec_name,
            sample_rate: meta.sample_rate,
            channels: meta.channels,
        }
    }
}

pub fn get_audio_metadata_result(path: PathBuf) -> Result<AudioMetadataResult, AppError> {
    let meta = get_audio_metadata(&path)?;
    Ok(AudioMetadataResult::from_meta(&path, meta))
}

/// Engine command a trim of `request` would run. `input_path` overrides the source shown.
pub fn preview_trim_command(
    processor: &TrimProcessor,
    request: &TrimRequest,
    input_path: Option<String>,
    multiline: bool,
) -> String {
    let input = input_path.unwrap_or_else(|| path_to_string(&request.source));
    let output = path_to_string(
        &processor
            .output_dir()
            .join(clip_file_name(0, request.format)),
    );
    match processor.command_preview(request, &input, &output) {
        Ok(args) if multiline => format!("ffmpeg\n{}", format_args_for_display_multiline(&args)),
        Ok(args) => format!("ffmpeg {}", join_command_line(&args)),
        Err(e) => format!("# error\n{}", e),
    }
}

/// Processor and controller wired to the real engine and ffplay.
pub fn build_controller() -> Result<(Arc<TrimProcessor>, SessionController), AppError> {
    let processor = Arc::new(TrimProcessor::from_environment()?);
    let backend = Arc::new(FfmpegBackend::new(Arc::clone(&processor)));
    let controller = SessionController::new(backend, Arc::new(FfplayPlayer::new()));
    Ok((processor, controller))
}

pub fn cleanup_startup_temp(max_age: Duration) {
    cleanup_old_temp_files(max_age);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::EncoderCapabilities;
    use crate::format::OutputFormat;

    fn processor(encoders: &[&str]) -> TrimProcessor {
        TrimProcessor::new(
            Arc::new(EncoderCapabilities::new(encoders.iter().copied())),
            None,
            PathBuf::from("/out"),
        )
    }

    #[test]
    fn capabilities_list_formats_backed_by_encoders() {
        let caps = app_capabilities(&processor(&["aac", "flac", "pcm_s16le"]));
        assert_eq!(caps.protocol_version, PROTOCOL_VERSION);
        assert!(!caps.native_mp3);
        let formats: Vec<OutputFormat> = caps.formats.iter().map(|f| f.format).collect();
        assert_eq!(formats, vec![OutputFormat::M4a, OutputFormat::Flac, OutputFormat::Wav]);
        assert_eq!(caps.encoders, vec!["aac", "flac", "pcm_s16le"]);

        let json = serde_json::to_value(&caps).expect("json");
        assert_eq!(json["protocolVersion"], 1);
        assert_eq!(json["nativeMp3"], false);
    }

    #[test]
    fn command_preview_single_line_quotes_paths() {
        let request = TrimRequest::new("/music/my song.mp3", 1_000, 3_500, OutputFormat::Wav);
        let cmd = preview_trim_command(&processor(&["pcm_s16le"]), &request, None, false);
        assert!(cmd.starts_with("ffmpeg -nostdin"));
        assert!(cmd.contains("\"/music/my song.mp3\""));
        assert!(cmd.contains("-c:a pcm_s16le"));
        assert!(cmd.ends_with("/out/clip_0.wav"));
    }

    #[test]
    fn command_preview_reports_invalid_requests() {
        let request = TrimRequest::new("/a.mp3", 2_000, 1_000, OutputFormat::Wav);
        let cmd = preview_trim_command(&processor(&[]), &request, Some("<input>".into()), true);
        assert!(cmd.starts_with("# error"));
        assert!(cmd.contains("End time must be greater than start time"));
    }
}
