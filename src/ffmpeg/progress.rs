use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time_(ms|us)=(\d+)").expect("invalid out_time regex"));

/// One line of FFmpeg output, classified for progress tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// `Duration: HH:MM:SS.ss` banner on stderr (input length, seconds).
    Duration(f64),
    /// `out_time_ms=` / `out_time_us=` from `-progress pipe:1` (both are microseconds).
    OutTime(f64),
    /// `progress=end`.
    End,
    Other,
}

pub fn parse_progress_line(line: &str) -> ProgressLine {
    let line = line.trim();
    if line == "progress=end" {
        return ProgressLine::End;
    }
    if let Some(caps) = OUT_TIME_RE.captures(line) {
        let micros: u64 = caps[2].parse().unwrap_or(0);
        return ProgressLine::OutTime(micros as f64 / 1_000_000.0);
    }
    if let Some(caps) = DURATION_RE.captures(line) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        return ProgressLine::Duration(hours * 3600.0 + minutes * 60.0 + seconds);
    }
    ProgressLine::Other
}

/// Tracks the expected output length and turns progress lines into a fraction in [0, 1].
///
/// When the caller already knows the output length (trim clips), the `Duration` banner
/// is ignored because it describes the whole source, not the clip being written.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    duration_secs: Option<f64>,
    duration_fixed: bool,
}

impl ProgressTracker {
    pub fn new(expected_duration_secs: Option<f64>) -> Self {
        let duration_secs = expected_duration_secs.filter(|d| d.is_finite() && *d > 0.0);
        Self {
            duration_secs,
            duration_fixed: duration_secs.is_some(),
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Feed one line; returns the new progress fraction when the line carries one.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        match parse_progress_line(line) {
            ProgressLine::Duration(d) if !self.duration_fixed && d > 0.0 => {
                self.duration_secs = Some(d);
                None
            }
            ProgressLine::OutTime(t) => {
                let dur = self.duration_secs?;
                Some((t / dur).clamp(0.0, 1.0))
            }
            ProgressLine::End => Some(1.0),
            _ => None,
        }
    }
}
