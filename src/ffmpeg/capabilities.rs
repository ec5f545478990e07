//! Encoder capability probing.
//!
//! Runs `ffmpeg -hide_banner -encoders` once per process and caches the set of audio
//! encoder names. A failed probe is cached as an empty set; callers treat that as
//! "no declared encoders" and fall back to the minimal format set.

use std::collections::BTreeSet;
use std::process::Command;
use std::sync::Arc;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use super::discovery::get_ffmpeg_path;
use crate::error::AppError;

/// Lowercase audio encoder identifiers reported by FFmpeg. Immutable once probed.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct EncoderCapabilities {
    encoders: BTreeSet<String>,
}

impl EncoderCapabilities {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            encoders: names
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, encoder: &str) -> bool {
        self.encoders.contains(encoder)
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn as_set(&self) -> &BTreeSet<String> {
        &self.encoders
    }
}

/// Parse the encoder table printed by `ffmpeg -encoders`.
///
/// Table rows look like ` A....D libmp3lame  libmp3lame MP3 (MPEG audio layer 3)`:
/// a six-character flag column whose first flag is the media type, then the name.
/// Legend rows (` A..... = Audio`) are skipped.
pub fn parse_encoder_listing(listing: &str) -> EncoderCapabilities {
    let names = listing.lines().filter_map(|line| {
        let mut tokens = line.split_whitespace();
        let flags = tokens.next()?;
        let name = tokens.next()?;
        let is_audio_row = flags.len() == 6 && flags.starts_with('A') && name != "=";
        is_audio_row.then(|| name.to_lowercase())
    });
    EncoderCapabilities::new(names)
}

/// Runs the engine in listing mode and returns its raw output.
fn run_encoder_listing() -> Result<String, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", "-loglevel", "error", "-encoders"]);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let output = cmd
        .output()
        .map_err(|e| AppError::ffmpeg_failed(-1, format!("Failed to spawn FFmpeg: {}", e)))?;
    if !output.status.success() {
        return Err(AppError::FfmpegFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Once-initialized capability cache. The lock is held across the probe, so concurrent
/// callers observe exactly one probe.
#[derive(Default)]
pub struct CapabilityCache {
    slot: Mutex<Option<Arc<EncoderCapabilities>>>,
}

impl CapabilityCache {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_probe<F>(&self, probe: F) -> Arc<EncoderCapabilities>
    where
        F: FnOnce() -> Result<String, AppError>,
    {
        let mut guard = self.slot.lock();
        if let Some(cached) = guard.as_ref() {
            log::trace!(
                target: "audio_trim::ffmpeg::capabilities",
                "Encoder set (cached): {} entries",
                cached.len()
            );
            return Arc::clone(cached);
        }
        let caps = match probe() {
            Ok(listing) => {
                let caps = parse_encoder_listing(&listing);
                log::info!(
                    target: "audio_trim::ffmpeg::capabilities",
                    "Probed {} audio encoders",
                    caps.len()
                );
                caps
            }
            Err(e) => {
                log::warn!(
                    target: "audio_trim::ffmpeg::capabilities",
                    "Encoder probe failed, using fallback formats: {}",
                    e
                );
                EncoderCapabilities::empty()
            }
        };
        let caps = Arc::new(caps);
        *guard = Some(Arc::clone(&caps));
        caps
    }

    pub fn cached(&self) -> Option<Arc<EncoderCapabilities>> {
        self.slot.lock().clone()
    }

    #[cfg(any(test, feature = "integration-test-api"))]
    pub fn reset(&self) {
        *self.slot.lock() = None;
    }
}

static CAPABILITY_CACHE: CapabilityCache = CapabilityCache::new();

/// Audio encoders compiled into the resolved FFmpeg. Probed on first call, then cached.
pub fn get_supported_encoders() -> Arc<EncoderCapabilities> {
    CAPABILITY_CACHE.get_or_probe(run_encoder_listing)
}

#[cfg(feature = "integration-test-api")]
pub fn reset_encoder_cache_for_test() {
    CAPABILITY_CACHE.reset();
}
