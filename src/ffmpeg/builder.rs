//! Argument construction for every engine invocation. All functions here are pure.

use super::TrimRequest;
use super::capabilities::EncoderCapabilities;
use super::{MAX_SPEED, MIN_SPEED};
use crate::error::AppError;
use crate::format::{OutputFormat, QualityPreset};

/// Speeds within this distance of 1.0 get no tempo filter at all.
const SPEED_EPSILON: f64 = 0.01;
/// Single `atempo` stage bounds.
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// Raw PCM handed to the native MP3 encoder.
pub const DECODE_SAMPLE_RATE: u32 = 44_100;
pub const DECODE_CHANNELS: u16 = 2;
/// Waveform decode rate (mono).
pub const ENVELOPE_SAMPLE_RATE: u32 = 8_000;

/// Milliseconds as seconds with three decimals, the form `-ss`/`-t` get.
pub fn format_seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Per-stage tempo factors whose product is `speed`, each within [0.5, 2.0].
///
/// Speed is clamped to [0.1, 4.0] first. Returns an empty chain for speed ≈ 1.0.
pub fn build_tempo_chain(speed: f64) -> Vec<f64> {
    let speed = if speed.is_finite() { speed } else { 1.0 };
    let mut factor = speed.clamp(MIN_SPEED, MAX_SPEED);
    if (factor - 1.0).abs() < SPEED_EPSILON {
        return Vec::new();
    }
    let mut stages = Vec::new();
    while factor > ATEMPO_MAX {
        stages.push(ATEMPO_MAX);
        factor /= ATEMPO_MAX;
    }
    while factor < ATEMPO_MIN {
        stages.push(ATEMPO_MIN);
        factor /= ATEMPO_MIN;
    }
    stages.push(factor);
    stages
}

fn format_factor(factor: f64) -> String {
    let text = format!("{:.6}", factor);
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// `atempo=a,atempo=b,...` for `-filter:a`, or None when no tempo change is needed.
pub fn tempo_filter(speed: f64) -> Option<String> {
    let chain = build_tempo_chain(speed);
    if chain.is_empty() {
        return None;
    }
    Some(
        chain
            .iter()
            .map(|f| format!("atempo={}", format_factor(*f)))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// First candidate for `format` present in `encoders`.
///
/// An empty set means the probe failed, so the first candidate is used unconditionally.
/// A non-empty set without any candidate is a distinct "codec unavailable" failure.
pub fn select_encoder(
    format: OutputFormat,
    encoders: &EncoderCapabilities,
) -> Result<&'static str, AppError> {
    let candidates = format.encoder_candidates();
    if encoders.is_empty() {
        return Ok(candidates[0]);
    }
    candidates
        .iter()
        .copied()
        .find(|c| encoders.contains(c))
        .ok_or_else(|| AppError::CodecUnavailable {
            format: format.extension().to_string(),
            candidates: candidates.iter().copied().map(str::to_string).collect(),
        })
}

/// Codec, bitrate and muxer arguments. Lossless formats ignore quality.
pub fn codec_args(format: OutputFormat, quality: QualityPreset, encoder: &str) -> Vec<String> {
    let mut args = vec!["-c:a".to_string(), encoder.to_string()];
    if !format.is_lossless() {
        args.extend(["-b:a".to_string(), format!("{}k", quality.bitrate_kbps())]);
    }
    if encoder == "vorbis" {
        // FFmpeg's built-in Vorbis encoder is flagged experimental.
        args.extend(["-strict".to_string(), "experimental".to_string()]);
    }
    args.extend(format.muxer_args().iter().map(|a| a.to_string()));
    args
}

/// Seek, duration, input and tempo arguments shared by the encode and raw-decode paths.
/// Seeking happens before `-i` (input seeking).
fn clip_input_args(request: &TrimRequest, input_path: &str) -> Vec<String> {
    let mut args = vec![
        "-ss".to_string(),
        format_seconds(request.start_ms),
        "-t".to_string(),
        format_seconds(request.clip_duration_ms()),
        "-i".to_string(),
        input_path.to_string(),
        "-vn".to_string(),
    ];
    if let Some(filter) = tempo_filter(request.speed) {
        args.extend(["-filter:a".to_string(), filter]);
    }
    args
}

fn preamble() -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-hide_banner".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
    ]
}

/// Full argument list for one trim invocation.
pub fn build_trim_arguments(
    request: &TrimRequest,
    input_path: &str,
    output_path: &str,
    encoders: &EncoderCapabilities,
) -> Result<Vec<String>, AppError> {
    request.validate()?;
    let encoder = select_encoder(request.format, encoders)?;

    log::debug!(
        target: "audio_trim::ffmpeg::builder",
        "Building trim command: format={}, encoder={}, range={}..{}ms, speed={}, input={} -> output={}",
        request.format,
        encoder,
        request.start_ms,
        request.end_ms,
        request.speed,
        input_path,
        output_path
    );

    let mut args = preamble();
    args.extend(clip_input_args(request, input_path));
    args.extend(codec_args(request.format, request.quality, encoder));
    args.extend(["-y".to_string(), output_path.to_string()]);
    Ok(args)
}

/// Decode the clip (with the same seek/duration/tempo) to raw s16le PCM for the native encoder.
pub fn build_pcm_decode_args(
    request: &TrimRequest,
    input_path: &str,
    pcm_path: &str,
) -> Result<Vec<String>, AppError> {
    request.validate()?;
    let mut args = preamble();
    args.extend(clip_input_args(request, input_path));
    args.extend([
        "-ac".to_string(),
        DECODE_CHANNELS.to_string(),
        "-ar".to_string(),
        DECODE_SAMPLE_RATE.to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-y".to_string(),
        pcm_path.to_string(),
    ]);
    Ok(args)
}

/// Decode the whole source to mono 8 kHz s16le for waveform display.
pub fn build_envelope_decode_args(input_path: &str, pcm_path: &str) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        input_path.to_string(),
        "-vn".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        ENVELOPE_SAMPLE_RATE.to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-y".to_string(),
        pcm_path.to_string(),
    ]
}

/// Single command-line string; arguments containing spaces are double-quoted.
pub fn join_command_line(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.contains(' ') {
                format!("\"{}\"", a)
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-')
        {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start_ms: u64, end_ms: u64, format: OutputFormat) -> TrimRequest {
        TrimRequest::new("/music/in.flac", start_ms, end_ms, format)
    }

    fn caps(names: &[&str]) -> EncoderCapabilities {
        EncoderCapabilities::new(names.iter().copied())
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let idx = args.iter().position(|a| a == flag)?;
        args.get(idx + 1).map(String::as_str)
    }

    fn product(stages: &[f64]) -> f64 {
        stages.iter().product()
    }

    #[test]
    fn plain_trim_seeks_before_input() {
        let args = build_trim_arguments(
            &request(2_000, 7_000, OutputFormat::Mp3),
            "/tmp/src.tmp",
            "/out/clip.mp3",
            &caps(&["libmp3lame"]),
        )
        .expect("args");
        assert_eq!(value_after(&args, "-ss"), Some("2.000"));
        assert_eq!(value_after(&args, "-t"), Some("5.000"));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input, "seek must precede input");
        assert!(!args.iter().any(|a| a == "-filter:a"));
        assert_eq!(value_after(&args, "-c:a"), Some("libmp3lame"));
        assert_eq!(value_after(&args, "-b:a"), Some("320k"));
        assert_eq!(args.last().map(String::as_str), Some("/out/clip.mp3"));
    }

    #[test]
    fn build_is_deterministic() {
        let req = request(1_234, 9_876, OutputFormat::Ogg).with_speed(1.7);
        let encoders = caps(&["libvorbis", "aac"]);
        let a = build_trim_arguments(&req, "/in", "/out.ogg", &encoders).expect("a");
        let b = build_trim_arguments(&req, "/in", "/out.ogg", &encoders).expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_range_fails_before_encoder_selection() {
        let err = build_trim_arguments(
            &request(7_000, 7_000, OutputFormat::Mp3),
            "/in",
            "/out",
            &caps(&["aac"]),
        )
        .expect_err("should fail");
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn tempo_chain_examples() {
        assert_eq!(build_tempo_chain(3.0), vec![2.0, 1.5]);
        assert_eq!(build_tempo_chain(0.25), vec![0.5, 0.5]);
        // 0.2 needs two halving stages; every stage stays within [0.5, 2.0].
        let slow = build_tempo_chain(0.2);
        assert_eq!(slow.len(), 3);
        assert_eq!(&slow[..2], &[0.5, 0.5]);
        assert!((slow[2] - 0.8).abs() < 1e-12);
        assert_eq!(tempo_filter(0.2).as_deref(), Some("atempo=0.5,atempo=0.5,atempo=0.8"));
        assert_eq!(build_tempo_chain(4.0), vec![2.0, 2.0]);
    }

    #[test]
    fn tempo_chain_empty_near_unity() {
        assert!(build_tempo_chain(1.0).is_empty());
        assert!(build_tempo_chain(1.009).is_empty());
        assert!(build_tempo_chain(0.991).is_empty());
        assert!(!build_tempo_chain(1.02).is_empty());
        assert_eq!(tempo_filter(1.0), None);
    }

    #[test]
    fn tempo_chain_product_and_bounds_hold_across_range() {
        let mut speed = 0.1;
        while speed <= 4.0 + 1e-9 {
            let stages = build_tempo_chain(speed);
            if (speed - 1.0).abs() >= SPEED_EPSILON {
                assert!(
                    (product(&stages) - speed).abs() < 1e-9,
                    "speed {} -> {:?}",
                    speed,
                    stages
                );
                for s in &stages {
                    assert!(
                        (ATEMPO_MIN..=ATEMPO_MAX).contains(s),
                        "stage {} out of range for speed {}",
                        s,
                        speed
                    );
                }
            }
            speed += 0.05;
        }
    }

    #[test]
    fn tempo_chain_clamps_out_of_range_speed() {
        assert_eq!(build_tempo_chain(10.0), vec![2.0, 2.0]);
        assert!((product(&build_tempo_chain(0.01)) - 0.1).abs() < 1e-9);
        assert!(build_tempo_chain(f64::NAN).is_empty());
    }

    #[test]
    fn tempo_filter_string() {
        assert_eq!(
            tempo_filter(3.0).as_deref(),
            Some("atempo=2.0,atempo=1.5")
        );
        assert_eq!(
            tempo_filter(0.25).as_deref(),
            Some("atempo=0.5,atempo=0.5")
        );
        let req = request(0, 1_000, OutputFormat::Wav).with_speed(3.0);
        let args = build_trim_arguments(&req, "/in", "/out.wav", &EncoderCapabilities::empty())
            .expect("args");
        assert_eq!(value_after(&args, "-filter:a"), Some("atempo=2.0,atempo=1.5"));
    }

    #[test]
    fn encoder_selection_prefers_first_present_candidate() {
        let encoders = caps(&["libshine", "libmp3lame"]);
        assert_eq!(
            select_encoder(OutputFormat::Mp3, &encoders).expect("mp3"),
            "libmp3lame"
        );
        let encoders = caps(&["libshine", "aac"]);
        assert_eq!(
            select_encoder(OutputFormat::Mp3, &encoders).expect("mp3"),
            "libshine"
        );
    }

    #[test]
    fn empty_capabilities_pick_first_candidate() {
        let empty = EncoderCapabilities::empty();
        assert_eq!(
            select_encoder(OutputFormat::Ogg, &empty).expect("ogg"),
            "libvorbis"
        );
        let args = build_trim_arguments(
            &request(0, 1_000, OutputFormat::Ogg),
            "/in",
            "/out.ogg",
            &empty,
        )
        .expect("args");
        assert_eq!(value_after(&args, "-c:a"), Some("libvorbis"));
    }

    #[test]
    fn disjoint_capabilities_fail_with_codec_unavailable() {
        let err = select_encoder(OutputFormat::Ogg, &caps(&["aac", "flac"]))
            .expect_err("no vorbis encoder");
        match err {
            AppError::CodecUnavailable { format, candidates } => {
                assert_eq!(format, "ogg");
                assert_eq!(candidates, vec!["libvorbis", "vorbis"]);
            }
            other => panic!("expected CodecUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn lossless_formats_ignore_quality() {
        for format in [OutputFormat::Flac, OutputFormat::Wav] {
            let args = codec_args(format, QualityPreset::Low, format.encoder_candidates()[0]);
            assert!(!args.iter().any(|a| a == "-b:a"), "{:?}: {:?}", format, args);
        }
        let args = codec_args(OutputFormat::M4a, QualityPreset::Medium, "aac");
        assert_eq!(
            args,
            vec!["-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart"]
        );
    }

    #[test]
    fn builtin_vorbis_gets_strict_flag() {
        let args = codec_args(OutputFormat::Ogg, QualityPreset::Low, "vorbis");
        assert_eq!(value_after(&args, "-strict"), Some("experimental"));
    }

    #[test]
    fn pcm_decode_keeps_clip_arguments() {
        let req = request(500, 2_500, OutputFormat::Mp3).with_speed(0.25);
        let args = build_pcm_decode_args(&req, "/in", "/tmp/clip.pcm").expect("args");
        assert_eq!(value_after(&args, "-ss"), Some("0.500"));
        assert_eq!(value_after(&args, "-t"), Some("2.000"));
        assert_eq!(value_after(&args, "-filter:a"), Some("atempo=0.5,atempo=0.5"));
        assert_eq!(value_after(&args, "-f"), Some("s16le"));
        assert_eq!(value_after(&args, "-ar"), Some("44100"));
        assert_eq!(value_after(&args, "-ac"), Some("2"));
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn envelope_decode_is_mono_8k() {
        let args = build_envelope_decode_args("/in.mp3", "/tmp/w.pcm");
        assert_eq!(value_after(&args, "-ac"), Some("1"));
        assert_eq!(value_after(&args, "-ar"), Some("8000"));
        assert_eq!(value_after(&args, "-f"), Some("s16le"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/w.pcm"));
    }

    #[test]
    fn join_quotes_arguments_with_spaces() {
        let args: Vec<String> = ["-i", "/My Music/a.mp3", "-y", "/out.wav"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            join_command_line(&args),
            "-i \"/My Music/a.mp3\" -y /out.wav"
        );
    }

    #[test]
    fn multiline_display_pairs_flags_with_values() {
        let args: Vec<String> = ["-nostdin", "-ss", "1.000", "-i", "/in", "/out"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -nostdin\n  -ss 1.000\n  -i /in\n  /out"
        );
    }
}
