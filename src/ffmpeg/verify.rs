//! Output validation.
//!
//! Every trim checks that the output exists and is non-empty. Integration tests can
//! additionally decode the file to null: a valid file decodes without errors.

use std::fs;
use std::path::Path;

use crate::error::AppError;

/// Fails with `OutputMissing` unless `path` is a regular, non-empty file.
pub fn verify_output(path: &Path) -> Result<u64, AppError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(_) | Err(_) => {
            log::error!(
                target: "audio_trim::ffmpeg::verify",
                "Output missing or empty: {}",
                path.display()
            );
            Err(AppError::OutputMissing(path.to_path_buf()))
        }
    }
}

/// Run FFmpeg decode-to-null. Returns Ok(()) if decode succeeds without errors.
#[cfg(any(test, feature = "integration-test-api"))]
pub fn verify_audio(path: &Path) -> Result<(), String> {
    use std::process::Command;

    let ffmpeg = super::discovery::get_ffmpeg_path().map_err(|e| e.to_string())?;
    let path_str = path.to_string_lossy();
    let output = Command::new(ffmpeg)
        .args(["-v", "error", "-i", path_str.as_ref(), "-f", "null", "-"])
        .output()
        .map_err(|e| e.to_string())?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if output.status.success() && !stderr.to_lowercase().contains("error") {
        return Ok(());
    }
    Err(format!(
        "Audio verification failed (exit {}): {}",
        output.status.code().unwrap_or(-1),
        stderr
    ))
}
