//! Map FFmpeg exit codes and stderr to short user-facing messages.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.
//! For the general code, well-known stderr lines give a more specific summary.
//! Stderr is always kept as detail for debugging.

use serde::Serialize;

/// Payload shown to the user: summary is the notification text, detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

/// Lowercased stderr fragments that identify a common failure, checked in order.
const STDERR_HINTS: &[(&str, &str)] = &[
    ("unknown encoder", "Encoder not available in this FFmpeg build."),
    ("encoder not found", "Encoder not available in this FFmpeg build."),
    ("no such file or directory", "Source file not found."),
    ("permission denied", "Permission denied while reading or writing audio."),
    ("does not contain any stream", "No audio stream found in source."),
    ("output file does not contain any stream", "No audio stream found in source."),
    ("invalid data found when processing input", "Unsupported or corrupt audio file."),
    ("no space left on device", "Not enough disk space for the output file."),
];

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(1) => stderr_hint(stderr)
            .map(str::to_string)
            .unwrap_or_else(|| "FFmpeg failed.".into()),
        Some(code) => match known_exit_code_summary(code) {
            Some(msg) => msg,
            None => format!("FFmpeg failed (exit code {}).", code),
        },
        None => fallback_summary(stderr),
    };
    let detail = stderr.trim().to_string();
    FfmpegErrorPayload { summary, detail }
}

fn stderr_hint(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();
    STDERR_HINTS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, hint)| *hint)
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

const ELLIPSIS: &str = "…";

/// First non-empty stderr line, truncated to `max_len` bytes on a char boundary.
fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}

fn fallback_summary(stderr: &str) -> String {
    first_line_truncated(stderr, 120)
}
