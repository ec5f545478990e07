#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use audio_trim_core::ffmpeg::verify_audio;
use audio_trim_core::test_support::probe_duration_ms_for_test;
use audio_trim_core::trim::TrimOutput;

/// Duration tolerance for trimmed outputs; encoders pad a frame or two.
pub const DURATION_TOLERANCE_MS: u64 = 150;

pub enum AudioKind {
    /// Mono 440 Hz sine.
    Sine,
    /// Digital silence.
    Silence,
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = audio_trim_core::ffmpeg::discovery::get_ffmpeg_path()
            .expect("FFmpeg not found");
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn output_dir(&self) -> PathBuf {
        let dir = self.path("clips");
        std::fs::create_dir_all(&dir).expect("create clips dir");
        dir
    }

    pub fn with_test_audio(&self, input_name: &str, duration_secs: f32, kind: AudioKind) -> PathBuf {
        let output_path = self.path(input_name);
        let status = create_test_audio(&self.ffmpeg, &output_path, duration_secs, kind)
            .expect("failed to create test audio");
        assert!(status.success(), "ffmpeg failed to create test audio");
        output_path
    }
}

pub fn create_test_audio(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    kind: AudioKind,
) -> std::io::Result<ExitStatus> {
    let source = match kind {
        AudioKind::Sine => format!("sine=frequency=440:sample_rate=44100:duration={}", duration_secs),
        AudioKind::Silence => format!("anullsrc=r=44100:cl=mono:d={}", duration_secs),
    };
    Command::new(ffmpeg)
        .args([
            "-loglevel",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            &source,
            output_path.to_string_lossy().as_ref(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

/// Output exists, decodes cleanly and lasts about `expected_ms`.
pub fn assert_clip(output: &TrimOutput, expected_ms: u64) {
    assert!(output.path.is_file(), "missing {}", output.path.display());
    assert!(output.size > 0);
    verify_audio(&output.path).unwrap_or_else(|e| panic!("{}", e));
    let actual = probe_duration_ms_for_test(output.path.clone()).expect("probe output");
    assert!(
        actual.abs_diff(expected_ms) <= DURATION_TOLERANCE_MS,
        "expected ~{}ms, got {}ms for {}",
        expected_ms,
        actual,
        output.path.display()
    );
}
