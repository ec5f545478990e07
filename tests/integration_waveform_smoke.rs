#![cfg(feature = "integration-test-api")]

mod support;

use std::path::Path;

use audio_trim_core::test_support::{app_capabilities_for_test, extract_waveform_for_test};
use serial_test::serial;
use support::{AudioKind, IntegrationEnv};

#[test]
fn sine_envelope_has_requested_buckets_and_signal() {
    let env = IntegrationEnv::new();
    let input = env.with_test_audio("sine.wav", 3.0, AudioKind::Sine);
    let envelope = extract_waveform_for_test(&input, 64);
    assert_eq!(envelope.len(), 64);
    assert!(envelope.values().iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(envelope.values().iter().any(|v| *v > 0.1));
}

#[test]
fn silence_envelope_is_flat() {
    let env = IntegrationEnv::new();
    let input = env.with_test_audio("silence.wav", 2.0, AudioKind::Silence);
    let envelope = extract_waveform_for_test(&input, 32);
    assert!(!envelope.is_empty());
    assert!(envelope.values().iter().all(|v| *v == 0.0));
}

#[test]
fn unreadable_source_yields_empty_envelope() {
    let envelope = extract_waveform_for_test(Path::new("/definitely/missing.wav"), 32);
    assert!(envelope.is_empty());
}

#[test]
#[serial]
fn capabilities_report_probed_encoders() {
    let env = IntegrationEnv::new();
    let caps = app_capabilities_for_test(&env.output_dir()).expect("capabilities");
    assert_eq!(caps.protocol_version, 1);
    assert!(caps.encoders.iter().any(|e| e == "pcm_s16le"));
    assert!(caps.formats.iter().any(|f| f["format"] == "wav"));
}
