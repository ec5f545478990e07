use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

#[cfg(target_os = "windows")]
fn find_in_path() -> Option<PathBuf> {
    let output = Command::new("where").arg("ffmpeg").output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

#[cfg(not(target_os = "windows"))]
fn find_in_path() -> Option<PathBuf> {
    let output = Command::new("which").arg("ffmpeg").output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Binary shipped next to the sidecar executable (bundled builds).
fn bundled_path(base_name: &str) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    #[cfg(windows)]
    let path = exe_dir.join(format!("{}.exe", base_name.trim_end_matches(".exe")));
    #[cfg(not(windows))]
    let path = exe_dir.join(base_name);
    if path.exists() {
        log::debug!(
            target: "audio_trim::ffmpeg::discovery",
            "FFmpeg found next to executable: {}",
            path.display()
        );
        Some(path)
    } else {
        None
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    // Common paths first to avoid spawning which/where
    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "audio_trim::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    if let Some(p) = find_in_path()
        && p.exists()
    {
        log::debug!(
            target: "audio_trim::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = bundled_path("ffmpeg") {
        return Ok(p);
    }

    log::error!(
        target: "audio_trim::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// `FFMPEG_PATH`, when set to an existing file. Read on every lookup so it is never
/// shadowed by a previously discovered path.
fn env_override() -> Option<PathBuf> {
    let env_path = std::env::var_os("FFMPEG_PATH")?;
    let path = PathBuf::from(env_path);
    if path.exists() {
        log::trace!(
            target: "audio_trim::ffmpeg::discovery",
            "FFmpeg path from FFMPEG_PATH env: {}",
            path.display()
        );
        Some(path)
    } else {
        log::warn!(
            target: "audio_trim::ffmpeg::discovery",
            "Ignoring FFMPEG_PATH, no such file: {}",
            path.display()
        );
        None
    }
}

/// Get FFmpeg path. Discovery results are cached for process lifetime.
/// Env override: FFMPEG_PATH takes precedence (for tests/CI or bundled binaries).
pub fn get_ffmpeg_path() -> Result<PathBuf, AppError> {
    if let Some(path) = env_override() {
        return Ok(path);
    }
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        log::trace!(
            target: "audio_trim::ffmpeg::discovery",
            "FFmpeg path (cached): {}",
            path.display()
        );
        return Ok(path.clone());
    }
    let path = resolve_ffmpeg_path()?;
    // A racing thread may have initialized first; either value is a valid ffmpeg.
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).clone())
}

/// Paths to try for a companion tool (`ffprobe`, `ffplay`) given the ffmpeg binary path:
/// suffixed name first (bundled `ffmpeg-<target>` layout), then the plain name.
pub fn sibling_tool_candidates(ffmpeg_path: &Path, tool: &str) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let mut candidates = Vec::with_capacity(2);
    let suffix = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty());
    if let Some(suffix) = suffix {
        candidates.push(parent.join(executable_name(&format!("{tool}{suffix}"))));
    }
    candidates.push(parent.join(executable_name(tool)));
    candidates
}

fn executable_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn get_sibling_tool_path(tool: &str) -> Result<PathBuf, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    let candidates = sibling_tool_candidates(&ffmpeg, tool);
    if let Some(found) = candidates.iter().find(|c| c.exists()) {
        return Ok(found.clone());
    }
    Err(AppError::FfmpegNotFound(format!(
        "{} not found next to FFmpeg (looked at: {})",
        tool,
        candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// ffprobe lives next to ffmpeg (they ship together).
pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    get_sibling_tool_path("ffprobe")
}

/// ffplay is used for preview playback. Optional: many minimal builds omit it.
pub fn get_ffplay_path() -> Result<PathBuf, AppError> {
    get_sibling_tool_path("ffplay")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn sibling_candidates_plain_ffmpeg() {
        #[cfg(not(target_os = "windows"))]
        {
            let candidates = sibling_tool_candidates(Path::new("/usr/bin/ffmpeg"), "ffprobe");
            assert_eq!(candidates, vec![PathBuf::from("/usr/bin/ffprobe")]);
        }
        #[cfg(target_os = "windows")]
        {
            let candidates =
                sibling_tool_candidates(Path::new("C:\\bin\\ffmpeg.exe"), "ffprobe");
            assert_eq!(candidates, vec![PathBuf::from("C:\\bin\\ffprobe.exe")]);
        }
    }

    #[test]
    fn sibling_candidates_bundled_suffix() {
        #[cfg(not(target_os = "windows"))]
        {
            let candidates = sibling_tool_candidates(
                Path::new("/app/bin/ffmpeg-aarch64-apple-darwin"),
                "ffplay",
            );
            assert_eq!(
                candidates,
                vec![
                    PathBuf::from("/app/bin/ffplay-aarch64-apple-darwin"),
                    PathBuf::from("/app/bin/ffplay"),
                ]
            );
        }
    }

    #[test]
    #[serial_test::serial]
    fn env_override_wins_over_cached_discovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("ffmpeg-a");
        let second = dir.path().join("ffmpeg-b");
        std::fs::write(&first, b"").expect("write");
        std::fs::write(&second, b"").expect("write");
        let previous = std::env::var_os("FFMPEG_PATH");

        // SAFETY: serialized with every other test that touches FFMPEG_PATH.
        unsafe { std::env::set_var("FFMPEG_PATH", &first) };
        assert_eq!(get_ffmpeg_path().expect("first"), first);
        unsafe { std::env::set_var("FFMPEG_PATH", &second) };
        assert_eq!(get_ffmpeg_path().expect("second"), second);

        match previous {
            Some(v) => unsafe { std::env::set_var("FFMPEG_PATH", v) },
            None => unsafe { std::env::remove_var("FFMPEG_PATH") },
        }
    }

    #[test]
    fn sibling_candidates_without_parent_is_empty() {
        assert!(sibling_tool_candidates(Path::new(""), "ffprobe").is_empty());
    }
}
