use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Scratch files are only ever created under this directory name in the system temp dir.
const SCRATCH_DIR_NAME: &str = "audio-trim";
/// Name prefixes that stale-file cleanup is allowed to delete.
const SCRATCH_PREFIXES: &[&str] = &["audio_src_", "waveform_", "pcm_"];

/// `temp_dir()/audio-trim`. Not created until the first scratch file is requested.
pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(SCRATCH_DIR_NAME)
}

/// Generates a short suffix for temp filenames. Not cryptographically secure; for uniqueness only.
fn random_alphanumeric_suffix(len: usize) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    static STATE: AtomicU64 = AtomicU64::new(0);
    let mut seed = STATE.fetch_add(1, Ordering::Relaxed) ^ u64::from(std::process::id()) << 20;
    let mut s = String::with_capacity(len);
    for _ in 0..len {
        s.push(CHARS[(seed % CHARS.len() as u64) as usize] as char);
        seed = seed / CHARS.len() as u64 + 7919;
    }
    s
}

/// A scratch file that is deleted when dropped, on success and failure alike.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Reserve a unique path `<prefix><millis>-<suffix>.<extension>` under [`scratch_dir`].
    /// The file itself is not created.
    pub fn new(prefix: &str, extension: &str) -> io::Result<Self> {
        Self::new_in(&scratch_dir(), prefix, extension)
    }

    pub fn new_in(dir: &Path, prefix: &str, extension: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let name = format!(
            "{}{}-{}.{}",
            prefix,
            millis,
            random_alphanumeric_suffix(9),
            extension.trim_start_matches('.')
        );
        Ok(Self {
            path: dir.join(name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::trace!(
                target: "audio_trim::ffmpeg::temp",
                "Removed scratch file {}",
                self.path.display()
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "audio_trim::ffmpeg::temp",
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn is_scratch_name(name: &str) -> bool {
    SCRATCH_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Delete scratch files older than `max_age` in `dir`. Returns how many were removed.
pub fn cleanup_old_temp_files_in(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_scratch_name(&name.to_string_lossy()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age > max_age && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Startup hygiene: remove scratch left behind by a crashed or killed process.
pub fn cleanup_old_temp_files(max_age: Duration) {
    let removed = cleanup_old_temp_files_in(&scratch_dir(), max_age);
    if removed > 0 {
        log::info!(
            target: "audio_trim::ffmpeg::temp",
            "Removed {} stale scratch file(s)",
            removed
        );
    }
}
