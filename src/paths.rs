//! Output and config locations.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::AppError;
use crate::format::OutputFormat;

const APP_DIR_NAME: &str = "audio-trim";
const MUSIC_SUBDIR: &str = "Audio Trim";

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Candidate output directories in preference order.
fn output_dir_candidates() -> Vec<PathBuf> {
    if let Some(dir) = env_dir("AUDIO_TRIM_OUTPUT_DIR") {
        return vec![dir];
    }
    let mut candidates = Vec::with_capacity(3);
    if let Some(music) = dirs::audio_dir() {
        candidates.push(music.join(MUSIC_SUBDIR));
    }
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(APP_DIR_NAME).join("clips"));
    }
    candidates.push(std::env::temp_dir().join(APP_DIR_NAME).join("clips"));
    candidates
}

/// First output directory that exists or can be created.
pub fn output_dir() -> Result<PathBuf, AppError> {
    let mut last_err = None;
    for dir in output_dir_candidates() {
        match fs::create_dir_all(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) => {
                log::warn!(
                    target: "audio_trim::paths",
                    "Output dir {} unusable: {}",
                    dir.display(),
                    e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.map(AppError::from).unwrap_or_else(|| {
        AppError::from("No usable output directory")
    }))
}

/// `<config>/audio-trim`, or `AUDIO_TRIM_CONFIG_DIR` when set.
pub fn config_dir() -> PathBuf {
    env_dir("AUDIO_TRIM_CONFIG_DIR").unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME)
    })
}

pub fn clip_file_name(timestamp_ms: u128, format: OutputFormat) -> String {
    format!("clip_{}.{}", timestamp_ms, format.extension())
}

/// `dir/clip_<now ms>.<ext>`, moving the timestamp forward until the name is free.
pub fn clip_output_path(dir: &Path, format: OutputFormat) -> PathBuf {
    let mut stamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    loop {
        let path = dir.join(clip_file_name(stamp, format));
        if !path.exists() {
            return path;
        }
        stamp += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn clip_names_use_timestamp_and_extension() {
        assert_eq!(clip_file_name(1_700_000_000_123, OutputFormat::M4a), "clip_1700000000123.m4a");
        assert_eq!(clip_file_name(5, OutputFormat::Wav), "clip_5.wav");
    }

    #[test]
    fn clip_path_skips_existing_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = clip_output_path(dir.path(), OutputFormat::Flac);
        fs::write(&first, b"x").expect("write");
        let second = clip_output_path(dir.path(), OutputFormat::Flac);
        assert_ne!(first, second);
        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("clip_") && name.ends_with(".flac"));
    }

    #[test]
    #[serial]
    fn env_overrides_output_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("out");
        // SAFETY: serialized test; no other thread reads the environment here.
        unsafe { std::env::set_var("AUDIO_TRIM_OUTPUT_DIR", &target) };
        let resolved = output_dir();
        unsafe { std::env::remove_var("AUDIO_TRIM_OUTPUT_DIR") };
        assert_eq!(resolved.expect("dir"), target);
        assert!(target.is_dir());
    }

    #[test]
    #[serial]
    fn env_overrides_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        unsafe { std::env::set_var("AUDIO_TRIM_CONFIG_DIR", dir.path()) };
        let resolved = config_dir();
        unsafe { std::env::remove_var("AUDIO_TRIM_CONFIG_DIR") };
        assert_eq!(resolved, dir.path());
    }
}
