//! Test-only wrappers exposed for integration test targets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::ffmpeg::capabilities::reset_encoder_cache_for_test;
use crate::ffmpeg::ffprobe::get_audio_metadata;
use crate::ffmpeg::{EncoderCapabilities, TrimRequest, get_supported_encoders};
use crate::lame::Mp3Encoder;
use crate::sidecar_api;
use crate::trim::{TrimOutput, TrimProcessor};
use crate::waveform::{WaveformEnvelope, extract_envelope};

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesForTest {
    pub protocol_version: u8,
    pub encoders: Vec<String>,
    pub formats: Vec<serde_json::Value>,
    pub native_mp3: bool,
}

/// Processor using the real encoder probe, writing into `output_dir`.
pub fn processor_for_test(output_dir: &Path, mp3: Option<Arc<dyn Mp3Encoder>>) -> TrimProcessor {
    TrimProcessor::new(get_supported_encoders(), mp3, output_dir.to_path_buf())
}

/// Processor with an explicit encoder set, for forcing fallbacks.
pub fn processor_with_encoders_for_test(
    output_dir: &Path,
    encoders: &[&str],
    mp3: Option<Arc<dyn Mp3Encoder>>,
) -> TrimProcessor {
    TrimProcessor::new(
        Arc::new(EncoderCapabilities::new(encoders.iter().copied())),
        mp3,
        output_dir.to_path_buf(),
    )
}

pub fn run_trim_for_test(
    processor: &TrimProcessor,
    request: &TrimRequest,
) -> Result<TrimOutput, AppError> {
    processor.trim(request, None, None)
}

pub fn extract_waveform_for_test(source: &Path, buckets: usize) -> WaveformEnvelope {
    extract_envelope(source, buckets, None)
}

/// Duration of `path` in milliseconds as reported by ffprobe.
pub fn probe_duration_ms_for_test(path: PathBuf) -> Result<u64, String> {
    get_audio_metadata(&path)
        .map(|m| m.duration_ms)
        .map_err(|e| e.to_string())
}

/// Capabilities as the sidecar reports them, after a fresh encoder probe.
pub fn app_capabilities_for_test(output_dir: &Path) -> Result<AppCapabilitiesForTest, String> {
    reset_encoder_cache_for_test();
    let processor = processor_for_test(output_dir, None);
    let value = serde_json::to_value(sidecar_api::app_capabilities(&processor))
        .map_err(|e| e.to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}
