//! FFmpeg process spawning, abort handles and progress parsing.
//!
//! Spawns FFmpeg as a child process, parses progress from stdout (pipe:1),
//! and keeps a bounded tail of stderr for diagnostics. Reader threads drain both
//! pipes while the caller blocks. Each run can be tied to an [`AbortHandle`] so a
//! newer operation of the same kind can kill it.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::discovery::get_ffmpeg_path;
use super::progress::ProgressTracker;
use crate::error::AppError;

/// Receives normalized progress in [0,1].
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Minimum interval between progress emits.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct AbortState {
    aborted: AtomicBool,
    child: Mutex<Option<Child>>,
}

/// Cancels one engine run. Cloning shares the same underlying process slot.
#[derive(Clone, Default)]
pub struct AbortHandle {
    state: Arc<AbortState>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Marks the run aborted and kills the engine process if one is running.
    ///
    /// Never waits: the child stays in the slot and the thread running
    /// [`run_ffmpeg_blocking`] reaps it.
    pub fn abort(&self) {
        self.state.aborted.store(true, Ordering::SeqCst);
        if let Some(child) = self.state.child.lock().as_mut() {
            log::info!(
                target: "audio_trim::ffmpeg::runner",
                "Terminating FFmpeg process (pid={})",
                child.id()
            );
            let _ = child.kill();
        }
    }

    /// Stores the spawned child, or kills it straight away if abort already happened.
    fn install(&self, mut child: Child) -> Result<(), AppError> {
        let mut guard = self.state.child.lock();
        if self.is_aborted() {
            drop(guard);
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::aborted());
        }
        *guard = Some(child);
        Ok(())
    }

    fn take_child(&self) -> Option<Child> {
        self.state.child.lock().take()
    }
}

struct ReadStreamConfig {
    collect_stderr: Option<Arc<Mutex<Vec<u8>>>>,
    tracker: Arc<Mutex<ProgressTracker>>,
    progress_callback: Option<ProgressCallback>,
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    config: ReadStreamConfig,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last_emit = Instant::now();
        let mut last_progress = 0.0_f64;
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(ref buf) = config.collect_stderr {
                let mut guard = buf.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            let progress = config.tracker.lock().observe(line);
            if let (Some(p), Some(cb)) = (progress, config.progress_callback.as_ref()) {
                let now = Instant::now();
                let should_emit = now.duration_since(last_emit) >= PROGRESS_EMIT_INTERVAL
                    || (p - last_progress).abs() >= 0.01
                    || p >= 1.0;
                if should_emit {
                    last_emit = now;
                    last_progress = p;
                    cb(p);
                }
            }
            line_buf.clear();
        }
    })
}

/// Run FFmpeg and block until completion.
///
/// - `duration_secs`: expected output length, so progress can be computed from
///   `out_time_ms` without waiting for (or being misled by) the input Duration banner.
/// - `progress_callback`: throttled progress in [0,1].
/// - `abort`: when given, the child is registered there so another thread can kill it;
///   a killed run returns [`AppError::Aborted`].
pub fn run_ffmpeg_blocking(
    args: Vec<String>,
    duration_secs: Option<f64>,
    progress_callback: Option<ProgressCallback>,
    abort: Option<&AbortHandle>,
) -> Result<(), AppError> {
    let ffmpeg_path = get_ffmpeg_path()?;
    let local_handle;
    let abort = match abort {
        Some(handle) => handle,
        None => {
            local_handle = AbortHandle::new();
            &local_handle
        }
    };
    if abort.is_aborted() {
        return Err(AppError::aborted());
    }

    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    let output_arg = args.last();
    log::debug!(
        target: "audio_trim::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg_path.display(),
        input_arg,
        output_arg
    );

    let mut cmd = Command::new(&ffmpeg_path);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::ffmpeg_failed(-1, format!("Failed to spawn FFmpeg: {}", e)))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::from("Failed to capture FFmpeg output pipes"));
    };

    abort.install(child)?;

    let tracker = Arc::new(Mutex::new(ProgressTracker::new(duration_secs)));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = read_stream(
        stdout,
        ReadStreamConfig {
            collect_stderr: None,
            tracker: Arc::clone(&tracker),
            progress_callback,
        },
    );
    let stderr_handle = read_stream(
        stderr,
        ReadStreamConfig {
            collect_stderr: Some(Arc::clone(&stderr_buffer)),
            tracker,
            progress_callback: None,
        },
    );

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let Some(mut child) = abort.take_child() else {
        return Err(AppError::from("FFmpeg process handle went missing"));
    };
    let status = child.wait()?;
    if abort.is_aborted() {
        log::warn!(
            target: "audio_trim::ffmpeg::runner",
            "FFmpeg process was aborted (terminated externally)"
        );
        return Err(AppError::aborted());
    }

    let stderr_str = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();

    if status.success() {
        log::info!(
            target: "audio_trim::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        Ok(())
    } else {
        let code = status.code().unwrap_or(-1);
        let err_preview = stderr_str
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        log::error!(
            target: "audio_trim::ffmpeg::runner",
            "FFmpeg failed (code={}): {}",
            code,
            err_preview
        );
        Err(AppError::FfmpegFailed {
            code,
            stderr: stderr_str,
        })
    }
}
