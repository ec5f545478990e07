//! Waveform envelope extraction.
//!
//! FFmpeg decodes the source to mono 8 kHz s16le; amplitudes are block-averaged into
//! a fixed number of display buckets. Failure degrades to an empty envelope.

use std::fs;
use std::path::Path;

use crate::ffmpeg::{
    AbortHandle, ScratchFile, build_envelope_decode_args, path_to_string, run_ffmpeg_blocking,
};

/// Buckets used when the caller does not ask for a specific count.
pub const DEFAULT_BUCKETS: usize = 160;

const FULL_SCALE: f32 = 32767.0;

/// Display amplitudes in [0, 1]. Replaced wholesale on every new source.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WaveformEnvelope(Vec<f32>);

impl WaveformEnvelope {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Normalized magnitude per sample. A trailing odd byte counts as a silent sample.
pub fn parse_s16le_amplitudes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(2)
        .map(|pair| match *pair {
            [lo, hi] => f32::from(i16::from_le_bytes([lo, hi])).abs() / FULL_SCALE,
            _ => 0.0,
        })
        .collect()
}

/// Block-average `samples` into at most `buckets` values.
///
/// Block size is `max(1, len / buckets)`; the tail beyond `buckets` full blocks is dropped.
pub fn downsample(samples: &[f32], buckets: usize) -> Vec<f32> {
    if samples.is_empty() || buckets == 0 {
        return Vec::new();
    }
    let block = (samples.len() / buckets).max(1);
    samples
        .chunks(block)
        .take(buckets)
        .map(|chunk| (chunk.iter().sum::<f32>() / chunk.len() as f32).clamp(0.0, 1.0))
        .collect()
}

/// Decode `source` and build its envelope. Any failure yields an empty envelope.
pub fn extract_envelope(
    source: &Path,
    buckets: usize,
    abort: Option<&AbortHandle>,
) -> WaveformEnvelope {
    let scratch = match ScratchFile::new("waveform_", "pcm") {
        Ok(s) => s,
        Err(e) => {
            log::warn!(
                target: "audio_trim::waveform",
                "Could not reserve scratch file: {}",
                e
            );
            return WaveformEnvelope::default();
        }
    };
    let args = build_envelope_decode_args(&path_to_string(source), &path_to_string(scratch.path()));
    if let Err(e) = run_ffmpeg_blocking(args, None, None, abort) {
        if e.is_aborted() {
            log::info!(target: "audio_trim::waveform", "Waveform extraction cancelled");
        } else {
            log::warn!(
                target: "audio_trim::waveform",
                "Waveform decode failed for {}: {}",
                source.display(),
                e
            );
        }
        return WaveformEnvelope::default();
    }
    let bytes = match fs::read(scratch.path()) {
        Ok(b) => b,
        Err(e) => {
            log::warn!(target: "audio_trim::waveform", "Reading decoded PCM failed: {}", e);
            return WaveformEnvelope::default();
        }
    };
    let envelope = WaveformEnvelope(downsample(&parse_s16le_amplitudes(&bytes), buckets));
    log::debug!(
        target: "audio_trim::waveform",
        "Waveform: {} samples -> {} buckets ({})",
        bytes.len().div_ceil(2),
        envelope.len(),
        source.display()
    );
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn amplitudes_are_normalized_magnitudes() {
        let amps = parse_s16le_amplitudes(&le(&[0, 32767, -32767, 16384]));
        assert_eq!(amps.len(), 4);
        assert_eq!(amps[0], 0.0);
        assert_eq!(amps[1], 1.0);
        assert_eq!(amps[2], 1.0);
        assert!((amps[3] - 0.5).abs() < 0.001);
    }

    #[test]
    fn odd_trailing_byte_is_silent_sample() {
        let mut bytes = le(&[32767]);
        bytes.push(0x7f);
        assert_eq!(parse_s16le_amplitudes(&bytes), vec![1.0, 0.0]);
    }

    #[test]
    fn min_sample_is_clamped_after_averaging() {
        let amps = parse_s16le_amplitudes(&le(&[i16::MIN]));
        assert!(amps[0] > 1.0);
        assert_eq!(downsample(&amps, 4), vec![1.0]);
    }

    #[test]
    fn downsample_averages_blocks_and_truncates_tail() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        let out = downsample(&samples, 3);
        // block = 10 / 3 = 3; sample 9 is dropped
        assert_eq!(out.len(), 3);
        assert!((out[0] - 0.1).abs() < 1e-6);
        assert!((out[1] - 0.4).abs() < 1e-6);
        assert!((out[2] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn fewer_samples_than_buckets_gives_one_per_sample() {
        let out = downsample(&[0.2, 0.4, 0.6], DEFAULT_BUCKETS);
        assert_eq!(out, vec![0.2, 0.4, 0.6]);
    }

    #[test]
    fn envelope_bounds_hold_for_many_lengths() {
        for n in [1usize, 2, 159, 160, 161, 319, 320, 1000, 8000] {
            let samples: Vec<f32> = (0..n).map(|i| (i % 7) as f32 / 6.0).collect();
            for buckets in [1usize, 10, DEFAULT_BUCKETS] {
                let out = downsample(&samples, buckets);
                assert!(!out.is_empty());
                assert!(out.len() <= buckets, "n={} buckets={} len={}", n, buckets, out.len());
                assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
            }
        }
    }

    #[test]
    fn empty_stream_gives_empty_envelope() {
        assert!(downsample(&parse_s16le_amplitudes(&[]), DEFAULT_BUCKETS).is_empty());
        assert!(downsample(&[0.5], 0).is_empty());
    }

    #[test]
    #[serial_test::serial]
    fn missing_source_degrades_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let envelope = extract_envelope(&dir.path().join("nope.mp3"), DEFAULT_BUCKETS, None);
        assert!(envelope.is_empty());
    }

    #[test]
    fn envelope_serializes_as_plain_array() {
        let env = WaveformEnvelope::new(vec![0.0, 0.5]);
        assert_eq!(serde_json::to_string(&env).unwrap(), "[0.0,0.5]");
    }
}
