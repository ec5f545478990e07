//! Single owner of the session state.
//!
//! The controller turns intents into [`SessionEvent`]s, runs blocking media work on the
//! tokio blocking pool, and keeps at most one job per [`JobKind`]. Starting a job kills the
//! previous job of the same kind and waits for its task to finish before the new one runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::ffmpeg::ffprobe::get_audio_metadata;
use crate::ffmpeg::{AbortHandle, ProgressCallback, TrimRequest};
use crate::format::{OutputFormat, QualityPreset};
use crate::playback::{POSITION_POLL_INTERVAL, PreviewPlayer, preview_length};
use crate::session::{SessionEvent, SessionState, reduce};
use crate::trim::{TrimOutput, TrimProcessor};
use crate::waveform::{self, WaveformEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Trim,
    Waveform,
    Preview,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Trim, JobKind::Waveform, JobKind::Preview];
}

pub type StateListener = Arc<dyn Fn(&SessionState) + Send + Sync>;
pub type JobProgressListener = Arc<dyn Fn(JobKind, f64) + Send + Sync>;

/// Blocking media work the controller schedules.
pub trait MediaBackend: Send + Sync {
    /// Source duration, or 0 when unknown.
    fn probe_duration_ms(&self, source: &Path) -> u64;

    fn extract_waveform(&self, source: &Path, abort: &AbortHandle) -> WaveformEnvelope;

    fn trim(
        &self,
        request: &TrimRequest,
        progress: Option<ProgressCallback>,
        abort: &AbortHandle,
    ) -> Result<TrimOutput, AppError>;
}

/// Backend that shells out to the resolved FFmpeg tools.
pub struct FfmpegBackend {
    processor: Arc<TrimProcessor>,
    buckets: usize,
}

impl FfmpegBackend {
    pub fn new(processor: Arc<TrimProcessor>) -> Self {
        Self {
            processor,
            buckets: waveform::DEFAULT_BUCKETS,
        }
    }

    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }
}

impl MediaBackend for FfmpegBackend {
    fn probe_duration_ms(&self, source: &Path) -> u64 {
        match get_audio_metadata(source) {
            Ok(meta) => meta.duration_ms,
            Err(e) => {
                log::warn!(
                    target: "audio_trim::controller",
                    "Duration probe failed for {}: {}",
                    source.display(),
                    e
                );
                0
            }
        }
    }

    fn extract_waveform(&self, source: &Path, abort: &AbortHandle) -> WaveformEnvelope {
        waveform::extract_envelope(source, self.buckets, Some(abort))
    }

    fn trim(
        &self,
        request: &TrimRequest,
        progress: Option<ProgressCallback>,
        abort: &AbortHandle,
    ) -> Result<TrimOutput, AppError> {
        self.processor.trim(request, progress, Some(abort))
    }
}

struct JobSlot {
    abort: AbortHandle,
    task: JoinHandle<()>,
}

struct Inner {
    state: Mutex<SessionState>,
    listener: Mutex<Option<StateListener>>,
    progress: Mutex<Option<JobProgressListener>>,
}

impl Inner {
    fn dispatch(&self, event: SessionEvent) -> SessionState {
        let next = {
            let mut guard = self.state.lock();
            let next = reduce(&guard, event);
            *guard = next.clone();
            next
        };
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(&next);
        }
        next
    }

    fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }
}

/// A started trim.
pub struct PendingTrim {
    rx: oneshot::Receiver<Result<TrimOutput, AppError>>,
}

impl PendingTrim {
    /// Resolves to `Err(Aborted)` if the trim is cancelled or superseded.
    pub async fn finish(self) -> Result<TrimOutput, AppError> {
        self.rx.await.unwrap_or_else(|_| Err(AppError::aborted()))
    }
}

pub struct SessionController {
    inner: Arc<Inner>,
    backend: Arc<dyn MediaBackend>,
    player: Arc<dyn PreviewPlayer>,
    jobs: Mutex<HashMap<JobKind, JobSlot>>,
}

async fn stop_player_blocking(player: Arc<dyn PreviewPlayer>) {
    if let Err(e) = tokio::task::spawn_blocking(move || player.stop()).await {
        log::warn!(target: "audio_trim::controller", "Preview stop failed: {}", e);
    }
}

fn file_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

impl SessionController {
    pub fn new(backend: Arc<dyn MediaBackend>, player: Arc<dyn PreviewPlayer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::default()),
                listener: Mutex::new(None),
                progress: Mutex::new(None),
            }),
            backend,
            player,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Called with the full state after every change.
    pub fn set_state_listener(&self, listener: StateListener) {
        *self.inner.listener.lock() = Some(listener);
    }

    pub fn set_progress_listener(&self, listener: JobProgressListener) {
        *self.inner.progress.lock() = Some(listener);
    }

    pub fn state(&self) -> SessionState {
        self.inner.snapshot()
    }

    pub fn dispatch(&self, event: SessionEvent) -> SessionState {
        self.inner.dispatch(event)
    }

    fn install_job(&self, kind: JobKind, slot: JobSlot) {
        if let Some(displaced) = self.jobs.lock().insert(kind, slot) {
            // A concurrent start of the same kind won the race; it must not keep running.
            displaced.abort.abort();
        }
    }

    /// Kill the job of `kind` (if any) and wait for its task. Returns whether one was running.
    async fn cancel_job(&self, kind: JobKind) -> bool {
        let slot = self.jobs.lock().remove(&kind);
        let Some(slot) = slot else {
            return false;
        };
        let was_running = !slot.task.is_finished();
        slot.abort.abort();
        if kind == JobKind::Preview {
            self.stop_player().await;
        }
        if let Err(e) = slot.task.await {
            log::warn!(
                target: "audio_trim::controller",
                "{:?} task ended abnormally: {}",
                kind,
                e
            );
        }
        if was_running {
            log::info!(target: "audio_trim::controller", "Cancelled {:?} job", kind);
        }
        was_running
    }

    /// Stop the preview player off the async workers; stopping reaps the child.
    async fn stop_player(&self) {
        stop_player_blocking(Arc::clone(&self.player)).await;
    }

    /// Cancel one kind, or every kind when `kind` is None. Returns the kinds that were running.
    pub async fn cancel(&self, kind: Option<JobKind>) -> Vec<JobKind> {
        let kinds: Vec<JobKind> = match kind {
            Some(k) => vec![k],
            None => JobKind::ALL.to_vec(),
        };
        let mut cancelled = Vec::new();
        for kind in &kinds {
            if self.cancel_job(*kind).await {
                cancelled.push(*kind);
            }
        }
        let state = self.state();
        if state.is_processing && kinds.contains(&JobKind::Trim) {
            self.inner.dispatch(SessionEvent::TrimCancelled);
        }
        if state.is_playing && kinds.contains(&JobKind::Preview) {
            self.inner.dispatch(SessionEvent::PlaybackStopped);
        }
        cancelled
    }

    /// Wait for the job of `kind` to finish on its own.
    pub async fn wait_for(&self, kind: JobKind) {
        let slot = self.jobs.lock().remove(&kind);
        if let Some(slot) = slot {
            let _ = slot.task.await;
        }
    }

    /// Select a new source: cancels every job, probes duration, starts waveform extraction.
    pub async fn pick_file(&self, source: PathBuf) -> SessionState {
        for kind in JobKind::ALL {
            self.cancel_job(kind).await;
        }
        let backend = Arc::clone(&self.backend);
        let probe_path = source.clone();
        let duration_ms = tokio::task::spawn_blocking(move || backend.probe_duration_ms(&probe_path))
            .await
            .unwrap_or(0);
        let state = self.inner.dispatch(SessionEvent::FilePicked {
            file_name: file_display_name(&source),
            source: source.clone(),
            duration_ms,
        });
        self.start_waveform(source);
        state
    }

    fn start_waveform(&self, source: PathBuf) {
        let abort = AbortHandle::new();
        let task_abort = abort.clone();
        let backend = Arc::clone(&self.backend);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let blocking_abort = task_abort.clone();
            let envelope = tokio::task::spawn_blocking(move || {
                backend.extract_waveform(&source, &blocking_abort)
            })
            .await
            .unwrap_or_default();
            if !task_abort.is_aborted() {
                inner.dispatch(SessionEvent::WaveformLoaded(envelope));
            }
        });
        self.install_job(JobKind::Waveform, JobSlot { abort, task });
    }

    pub fn set_range(&self, start_ms: u64, end_ms: u64) -> SessionState {
        self.inner
            .dispatch(SessionEvent::RangeChanged { start_ms, end_ms })
    }

    pub fn set_format(&self, format: OutputFormat) -> SessionState {
        self.inner.dispatch(SessionEvent::FormatChanged(format))
    }

    pub fn set_quality(&self, quality: QualityPreset) -> SessionState {
        self.inner.dispatch(SessionEvent::QualityChanged(quality))
    }

    pub fn set_speed(&self, speed: f64) -> SessionState {
        self.inner.dispatch(SessionEvent::SpeedChanged(speed))
    }

    pub fn clear_message(&self) -> SessionState {
        self.inner.dispatch(SessionEvent::MessageCleared)
    }

    pub fn dismiss_result(&self) -> SessionState {
        self.inner.dispatch(SessionEvent::ResultDialogDismissed)
    }

    pub fn banner_finished(&self) -> SessionState {
        self.inner.dispatch(SessionEvent::BannerFinished)
    }

    /// Trim the current range. `None` when no file is selected.
    ///
    /// A trim already in flight is cancelled first. The returned result is
    /// `Err(Aborted)` if this trim is itself superseded.
    pub async fn trim(&self) -> Option<Result<TrimOutput, AppError>> {
        let pending = self.start_trim().await?;
        Some(pending.finish().await)
    }

    /// Snapshot the session, cancel any running trim and start a new one. Returns once
    /// the job is running; the outcome is delivered through [`PendingTrim`].
    pub async fn start_trim(&self) -> Option<PendingTrim> {
        let state = self.state();
        let source = state.source.clone()?;
        let request = TrimRequest {
            source,
            start_ms: state.start_ms,
            end_ms: state.end_ms,
            format: state.output_format,
            quality: state.quality,
            speed: state.speed,
        };

        self.cancel_job(JobKind::Trim).await;
        self.inner.dispatch(SessionEvent::TrimStarted);

        let abort = AbortHandle::new();
        let task_abort = abort.clone();
        let backend = Arc::clone(&self.backend);
        let inner = Arc::clone(&self.inner);
        let progress: Option<ProgressCallback> = self.inner.progress.lock().clone().map(|l| {
            Arc::new(move |p: f64| l(JobKind::Trim, p)) as ProgressCallback
        });
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let blocking_abort = task_abort.clone();
            let result = tokio::task::spawn_blocking(move || {
                backend.trim(&request, progress, &blocking_abort)
            })
            .await
            .unwrap_or_else(|e| Err(AppError::from(format!("Trim task failed: {}", e))));

            let result = if task_abort.is_aborted() {
                Err(AppError::aborted())
            } else {
                result
            };
            match &result {
                Ok(output) => {
                    inner.dispatch(SessionEvent::TrimSucceeded {
                        output: output.path.clone(),
                        saved_path: output.path.display().to_string(),
                    });
                }
                Err(e) if e.is_aborted() => {}
                Err(e) => {
                    inner.dispatch(SessionEvent::TrimFailed {
                        message: user_message(e),
                    });
                }
            }
            let _ = tx.send(result);
        });
        self.install_job(JobKind::Trim, JobSlot { abort, task });

        Some(PendingTrim { rx })
    }

    /// Start previewing the selected range, or stop if a preview is playing.
    pub async fn toggle_preview(&self) -> SessionState {
        let state = self.state();
        let Some(source) = state.source.clone() else {
            return state;
        };
        let was_playing = state.is_playing;
        self.cancel_job(JobKind::Preview).await;
        self.stop_player().await;
        if was_playing {
            return self.inner.dispatch(SessionEvent::PlaybackStopped);
        }

        let player = Arc::clone(&self.player);
        let (start_ms, end_ms, speed) = (state.start_ms, state.end_ms, state.speed);
        let started = tokio::task::spawn_blocking(move || {
            player.start(&source, start_ms, end_ms, speed)
        })
        .await
        .unwrap_or_else(|e| Err(AppError::from(format!("Preview task failed: {}", e))));
        if let Err(e) = started {
            self.stop_player().await;
            return self.inner.dispatch(SessionEvent::PlaybackFailed {
                message: e.to_string(),
            });
        }
        let next = self.inner.dispatch(SessionEvent::PlaybackStarted);

        let abort = AbortHandle::new();
        let task_abort = abort.clone();
        let player = Arc::clone(&self.player);
        let inner = Arc::clone(&self.inner);
        let length = preview_length(start_ms, end_ms, speed);
        let task = tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + length;
            let mut ticker = tokio::time::interval(POSITION_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if task_abort.is_aborted() {
                    return;
                }
                if !player.is_playing() || tokio::time::Instant::now() >= deadline {
                    stop_player_blocking(Arc::clone(&player)).await;
                    inner.dispatch(SessionEvent::PlaybackStopped);
                    return;
                }
                inner.dispatch(SessionEvent::PlaybackPosition(player.position_ms()));
            }
        });
        self.install_job(JobKind::Preview, JobSlot { abort, task });
        next
    }

    /// Cancel everything and stop playback. Call before dropping the controller.
    pub async fn shutdown(&self) {
        for kind in JobKind::ALL {
            self.cancel_job(kind).await;
        }
        self.stop_player().await;
    }
}

/// Short user-facing text for a failed trim.
pub fn user_message(err: &AppError) -> String {
    match err {
        AppError::FfmpegFailed { code, stderr } => {
            crate::ffmpeg::parse_ffmpeg_error(stderr, Some(*code)).summary
        }
        other => other.to_string(),
    }
}
