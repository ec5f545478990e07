//! Output containers, quality presets and the encoder candidate table.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    M4a,
    Mp3,
    Ogg,
    Flac,
    Wav,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    #[default]
    High,
    Medium,
    Low,
}

impl QualityPreset {
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            QualityPreset::High => 320,
            QualityPreset::Medium => 192,
            QualityPreset::Low => 128,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityPreset::High => "High",
            QualityPreset::Medium => "Standard",
            QualityPreset::Low => "Compact",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormatInfo {
    pub format: OutputFormat,
    pub extension: String,
    pub label: String,
    pub lossless: bool,
    pub encoders: Vec<String>,
}

struct FormatRow {
    format: OutputFormat,
    extension: &'static str,
    label: &'static str,
    lossless: bool,
    /// Encoder names in priority order. The first present in the probed set wins.
    candidates: &'static [&'static str],
    /// Extra muxer arguments appended after the codec arguments.
    muxer_args: &'static [&'static str],
}

macro_rules! format_table {
    (
        $( [$format:expr, $ext:expr, $label:expr, $lossless:expr, $candidates:expr, $muxer:expr] ),* $(,)?
    ) => {
        const FORMAT_TABLE: &[FormatRow] = &[
            $( FormatRow {
                format: $format,
                extension: $ext,
                label: $label,
                lossless: $lossless,
                candidates: $candidates,
                muxer_args: $muxer,
            } ),*
        ];

        /// Every output format, in display order.
        pub const ALL_FORMATS: &[OutputFormat] = &[ $($format),* ];
    };
}

format_table!(
    [OutputFormat::M4a, "m4a", "AAC (m4a)", false, &["aac", "libfdk_aac", "aac_at"], &["-movflags", "+faststart"]],
    [OutputFormat::Mp3, "mp3", "MP3", false, &["libmp3lame", "libshine", "mp3_mf"], &[]],
    [OutputFormat::Ogg, "ogg", "OGG", false, &["libvorbis", "vorbis"], &[]],
    [OutputFormat::Flac, "flac", "FLAC", true, &["flac"], &[]],
    [OutputFormat::Wav, "wav", "WAV", true, &["pcm_s16le"], &[]],
);

fn row(format: OutputFormat) -> &'static FormatRow {
    // Every variant has a row; see `format_table_covers_every_format`.
    FORMAT_TABLE
        .iter()
        .find(|r| r.format == format)
        .unwrap_or(&FORMAT_TABLE[0])
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        row(self).extension
    }

    pub fn label(self) -> &'static str {
        row(self).label
    }

    pub fn is_lossless(self) -> bool {
        row(self).lossless
    }

    pub fn encoder_candidates(self) -> &'static [&'static str] {
        row(self).candidates
    }

    pub fn muxer_args(self) -> &'static [&'static str] {
        row(self).muxer_args
    }

    pub fn info(self) -> FormatInfo {
        let row = row(self);
        FormatInfo {
            format: self,
            extension: row.extension.to_string(),
            label: row.label.to_string(),
            lossless: row.lossless,
            encoders: row.candidates.iter().copied().map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Formats the user can pick given the probed encoder set.
///
/// An empty set means the probe failed; callers then get the minimal safe set:
/// M4A and WAV (built into every FFmpeg), plus MP3 when the native encoder is loaded.
pub fn supported_formats(encoders: &BTreeSet<String>, native_mp3: bool) -> Vec<OutputFormat> {
    if encoders.is_empty() {
        let mut fallback = vec![OutputFormat::M4a];
        if native_mp3 {
            fallback.push(OutputFormat::Mp3);
        }
        fallback.push(OutputFormat::Wav);
        return fallback;
    }
    ALL_FORMATS
        .iter()
        .copied()
        .filter(|format| {
            let has_encoder = format
                .encoder_candidates()
                .iter()
                .any(|c| encoders.contains(*c));
            has_encoder || (*format == OutputFormat::Mp3 && native_mp3)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn format_table_covers_every_format() {
        for format in [
            OutputFormat::M4a,
            OutputFormat::Mp3,
            OutputFormat::Ogg,
            OutputFormat::Flac,
            OutputFormat::Wav,
        ] {
            assert!(
                FORMAT_TABLE.iter().any(|r| r.format == format),
                "missing table row for {:?}",
                format
            );
            assert!(!format.encoder_candidates().is_empty());
        }
        assert_eq!(ALL_FORMATS.len(), FORMAT_TABLE.len());
    }

    #[test]
    fn format_metadata() {
        assert_eq!(OutputFormat::M4a.extension(), "m4a");
        assert_eq!(OutputFormat::Ogg.encoder_candidates()[0], "libvorbis");
        assert_eq!(OutputFormat::Mp3.encoder_candidates()[0], "libmp3lame");
        assert!(OutputFormat::Flac.is_lossless());
        assert!(OutputFormat::Wav.is_lossless());
        assert!(!OutputFormat::Mp3.is_lossless());
        assert_eq!(OutputFormat::M4a.muxer_args(), &["-movflags", "+faststart"]);
    }

    #[test]
    fn quality_bitrates() {
        assert_eq!(QualityPreset::High.bitrate_kbps(), 320);
        assert_eq!(QualityPreset::Medium.bitrate_kbps(), 192);
        assert_eq!(QualityPreset::Low.bitrate_kbps(), 128);
        assert_eq!(QualityPreset::Medium.label(), "Standard");
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&OutputFormat::Flac).expect("serialize");
        assert_eq!(json, "\"flac\"");
        let q: QualityPreset = serde_json::from_str("\"low\"").expect("deserialize");
        assert_eq!(q, QualityPreset::Low);
    }

    #[test]
    fn supported_formats_fallback_when_probe_empty() {
        assert_eq!(
            supported_formats(&BTreeSet::new(), false),
            vec![OutputFormat::M4a, OutputFormat::Wav]
        );
        assert_eq!(
            supported_formats(&BTreeSet::new(), true),
            vec![OutputFormat::M4a, OutputFormat::Mp3, OutputFormat::Wav]
        );
    }

    #[test]
    fn supported_formats_follow_probed_encoders() {
        let encoders = set(&["aac", "flac", "pcm_s16le"]);
        assert_eq!(
            supported_formats(&encoders, false),
            vec![OutputFormat::M4a, OutputFormat::Flac, OutputFormat::Wav]
        );
        assert_eq!(
            supported_formats(&encoders, true),
            vec![
                OutputFormat::M4a,
                OutputFormat::Mp3,
                OutputFormat::Flac,
                OutputFormat::Wav
            ]
        );
    }

    #[test]
    fn secondary_candidate_enables_format() {
        let encoders = set(&["vorbis"]);
        assert_eq!(supported_formats(&encoders, false), vec![OutputFormat::Ogg]);
    }
}
