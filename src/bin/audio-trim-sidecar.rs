use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use audio_trim_core::controller::{JobKind, PendingTrim, SessionController};
use audio_trim_core::error::AppError;
use audio_trim_core::ffmpeg::{FfmpegProgressPayload, TrimRequest};
use audio_trim_core::format::{OutputFormat, QualityPreset};
use audio_trim_core::logging::init_logging;
use audio_trim_core::preferences::{PreferenceStore, ThemeMode};
use audio_trim_core::session::SessionState;
use audio_trim_core::sidecar_api;
use audio_trim_core::trim::TrimProcessor;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const STARTUP_CLEANUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
    },
    CommandPreview {
        request: TrimRequest,
        #[serde(rename = "inputPath")]
        input_path: Option<String>,
        #[serde(default)]
        multiline: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PickParams {
    input_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeParams {
    start_ms: u64,
    end_ms: u64,
}

#[derive(Debug, Deserialize)]
struct FormatParams {
    format: OutputFormat,
}

#[derive(Debug, Deserialize)]
struct QualityParams {
    quality: QualityPreset,
}

#[derive(Debug, Deserialize)]
struct SpeedParams {
    speed: f64,
}

#[derive(Debug, Deserialize, Default)]
struct MediaCancelParams {
    kind: Option<JobKind>,
}

#[derive(Debug, Deserialize)]
struct ThemeModeParams {
    mode: ThemeMode,
}

#[derive(Debug, Deserialize)]
struct OnboardingParams {
    seen: bool,
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct Sidecar {
    processor: Arc<TrimProcessor>,
    controller: SessionController,
    prefs: PreferenceStore,
}

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn emit_job_progress(writer: &SharedWriter, kind: JobKind, payload: FfmpegProgressPayload) {
    emit_rpc_event(
        writer,
        "media.job.progress",
        json!({
            "kind": kind,
            "progress": payload.progress,
            "step": payload.step,
        }),
    );
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::Aborted => RpcErrorPayload {
            summary: "Aborted".to_string(),
            detail: "Aborted".to_string(),
        },
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = audio_trim_core::ffmpeg::parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_request(format!("Invalid params payload: {}", e)))
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

/// Session methods share one ordered lane, so a pipelined `session.setRange` after
/// `session.pick` applies to the newly picked file.
fn is_session_request(method: &str) -> bool {
    method.starts_with("session.")
}

/// Runs on its own task so it can interrupt work queued in the session lane.
fn is_async_request(method: &str) -> bool {
    method == "media.cancel"
}

fn dispatch_sync(sidecar: &Sidecar, method: &str, params: Value) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_json(
            &sidecar_api::app_capabilities(&sidecar.processor),
            "app capabilities",
        ),
        "media.inspect" => match params_from_value(params)? {
            MediaInspectParams::Metadata { input_path } => to_json(
                &sidecar_api::get_audio_metadata_result(input_path)?,
                "metadata",
            ),
            MediaInspectParams::CommandPreview {
                request,
                input_path,
                multiline,
            } => Ok(Value::String(sidecar_api::preview_trim_command(
                &sidecar.processor,
                &request,
                input_path,
                multiline,
            ))),
        },
        "prefs.get" => to_json(&sidecar.prefs.get(), "preferences"),
        "prefs.setThemeMode" => {
            let p: ThemeModeParams = params_from_value(params)?;
            to_json(&sidecar.prefs.set_theme_mode(p.mode)?, "preferences")
        }
        "prefs.setOnboardingSeen" => {
            let p: OnboardingParams = params_from_value(params)?;
            to_json(&sidecar.prefs.set_onboarding_seen(p.seen)?, "preferences")
        }
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

async fn dispatch_async(sidecar: &Sidecar, method: &str, params: Value) -> Result<Value, AppError> {
    match method {
        "media.cancel" => {
            let p: MediaCancelParams = if params.is_null() {
                MediaCancelParams::default()
            } else {
                params_from_value(params)?
            };
            let cancelled = sidecar.controller.cancel(p.kind).await;
            Ok(json!({ "cancelled": cancelled }))
        }
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

enum SessionReply {
    Ready(Result<Value, AppError>),
    Trim(PendingTrim),
}

async fn dispatch_session(sidecar: &Sidecar, method: &str, params: Value) -> SessionReply {
    if method == "session.trim" {
        return match sidecar.controller.start_trim().await {
            Some(pending) => SessionReply::Trim(pending),
            None => SessionReply::Ready(Ok(Value::Null)),
        };
    }
    SessionReply::Ready(dispatch_session_call(sidecar, method, params).await)
}

async fn dispatch_session_call(
    sidecar: &Sidecar,
    method: &str,
    params: Value,
) -> Result<Value, AppError> {
    let controller = &sidecar.controller;
    match method {
        "session.pick" => {
            let p: PickParams = params_from_value(params)?;
            to_json(&controller.pick_file(p.input_path).await, "session state")
        }
        "session.togglePreview" => to_json(&controller.toggle_preview().await, "session state"),
        "session.state" => to_json(&controller.state(), "session state"),
        "session.setRange" => {
            let p: RangeParams = params_from_value(params)?;
            to_json(&controller.set_range(p.start_ms, p.end_ms), "session state")
        }
        "session.setFormat" => {
            let p: FormatParams = params_from_value(params)?;
            to_json(&controller.set_format(p.format), "session state")
        }
        "session.setQuality" => {
            let p: QualityParams = params_from_value(params)?;
            to_json(&controller.set_quality(p.quality), "session state")
        }
        "session.setSpeed" => {
            let p: SpeedParams = params_from_value(params)?;
            to_json(&controller.set_speed(p.speed), "session state")
        }
        "session.clearMessage" => to_json(&controller.clear_message(), "session state"),
        "session.dismissResult" => to_json(&controller.dismiss_result(), "session state"),
        "session.bannerFinished" => to_json(&controller.banner_finished(), "session state"),
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

async fn finish_trim(pending: PendingTrim) -> Result<Value, AppError> {
    let output = pending.finish().await?;
    to_json(&output, "trim output")
}

/// Handles `session.*` requests one at a time in arrival order. A trim holds the lane
/// only until it has started; its response is written when the job ends.
fn spawn_session_lane(
    runtime: &Handle,
    sidecar: Arc<Sidecar>,
    writer: SharedWriter,
) -> (mpsc::UnboundedSender<RpcRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcRequest>();
    let lane = runtime.spawn(async move {
        let mut trims = Vec::new();
        while let Some(request) = rx.recv().await {
            match dispatch_session(&sidecar, &request.method, request.params).await {
                SessionReply::Ready(result) => write_response(&writer, request.id, result),
                SessionReply::Trim(pending) => {
                    let writer = Arc::clone(&writer);
                    trims.push(tokio::spawn(async move {
                        write_response(&writer, request.id, finish_trim(pending).await);
                    }));
                }
            }
        }
        for trim in trims {
            let _ = trim.await;
        }
    });
    (tx, lane)
}

fn write_response(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let response = match result {
        Ok(result) => serde_json::to_value(RpcSuccess { id, result })
            .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
        Err(err) => {
            let payload = parse_error_payload(&err);
            serde_json::to_value(RpcFailure { id, error: payload })
                .map_err(|e| io::Error::other(format!("serialize failure: {}", e)))
        }
    };

    match response {
        Ok(value) => {
            let _ = write_json_line_shared(writer, &value);
        }
        Err(err) => {
            let failure = RpcFailure {
                id,
                error: RpcErrorPayload {
                    summary: "Serialization error".to_string(),
                    detail: err.to_string(),
                },
            };
            let _ = write_json_line_shared(writer, &failure);
        }
    }
}

fn write_stream_failure(writer: &SharedWriter, summary: &str, detail: String) {
    let failure = RpcFailure {
        id: 0,
        error: RpcErrorPayload {
            summary: summary.to_string(),
            detail,
        },
    };
    let _ = write_json_line_shared(writer, &failure);
}

fn main() -> io::Result<()> {
    init_logging();
    sidecar_api::cleanup_startup_temp(Duration::from_secs(STARTUP_CLEANUP_MAX_AGE_HOURS * 3600));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (processor, controller) = sidecar_api::build_controller()
        .map_err(|e| io::Error::other(format!("Failed to initialize: {}", e)))?;

    let stdout: SharedWriter = Arc::new(Mutex::new(Box::new(io::stdout()) as Box<dyn Write + Send>));
    let state_writer = Arc::clone(&stdout);
    controller.set_state_listener(Arc::new(move |state: &SessionState| {
        if let Ok(payload) = serde_json::to_value(state) {
            emit_rpc_event(&state_writer, "session.state", payload);
        }
    }));
    let progress_writer = Arc::clone(&stdout);
    controller.set_progress_listener(Arc::new(move |kind: JobKind, progress: f64| {
        emit_job_progress(
            &progress_writer,
            kind,
            FfmpegProgressPayload {
                progress,
                step: None,
            },
        )
    }));

    let sidecar = Arc::new(Sidecar {
        processor,
        controller,
        prefs: PreferenceStore::from_environment(),
    });
    log::info!(
        target: "audio_trim::sidecar",
        "Sidecar ready (protocol {})",
        sidecar_api::PROTOCOL_VERSION
    );

    let (session_lane, session_worker) =
        spawn_session_lane(runtime.handle(), Arc::clone(&sidecar), Arc::clone(&stdout));
    let mut async_workers = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                write_stream_failure(&stdout, "Invalid input stream", err.to_string());
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_stream_failure(&stdout, "Invalid request", err.to_string());
                continue;
            }
        };
        log::debug!(target: "audio_trim::sidecar", "Request {} {}", request.id, request.method);

        if is_session_request(&request.method) {
            if let Err(mpsc::error::SendError(request)) = session_lane.send(request) {
                write_response(
                    &stdout,
                    request.id,
                    Err(AppError::from("Session lane is closed")),
                );
            }
        } else if is_async_request(&request.method) {
            let writer = Arc::clone(&stdout);
            let sidecar = Arc::clone(&sidecar);
            async_workers.push(runtime.spawn(async move {
                let result = dispatch_async(&sidecar, &request.method, request.params).await;
                write_response(&writer, request.id, result);
            }));
        } else {
            let result = dispatch_sync(&sidecar, &request.method, request.params);
            write_response(&stdout, request.id, result);
        }
    }

    drop(session_lane);
    runtime.block_on(async {
        let _ = session_worker.await;
        for worker in async_workers {
            let _ = worker.await;
        }
        sidecar.controller.shutdown().await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_trim_core::controller::MediaBackend;
    use audio_trim_core::ffmpeg::{AbortHandle, EncoderCapabilities, ProgressCallback};
    use audio_trim_core::playback::PreviewPlayer;
    use audio_trim_core::trim::TrimOutput;
    use audio_trim_core::waveform::WaveformEnvelope;
    use std::path::Path;

    #[test]
    fn engine_failures_map_to_summary_and_detail() {
        let err = AppError::ffmpeg_failed(1, "line one\nInvalid data found when processing input");
        let payload = parse_error_payload(&err);
        assert!(!payload.summary.is_empty());
        assert!(payload.detail.contains("Invalid data found"));

        let spawn = parse_error_payload(&AppError::from("Failed to start FFmpeg"));
        assert_eq!(spawn.summary, "Failed to start FFmpeg");

        let aborted = parse_error_payload(&AppError::Aborted);
        assert_eq!(aborted.summary, "Aborted");
    }

    #[test]
    fn inspect_params_are_tagged_by_kind() {
        let parsed: MediaInspectParams = params_from_value(json!({
            "kind": "commandPreview",
            "request": { "source": "/a.mp3", "startMs": 0, "endMs": 1000, "format": "wav" },
            "multiline": true
        }))
        .expect("parse");
        match parsed {
            MediaInspectParams::CommandPreview {
                request,
                input_path,
                multiline,
            } => {
                assert_eq!(request.format, OutputFormat::Wav);
                assert_eq!(request.speed, 1.0);
                assert!(input_path.is_none());
                assert!(multiline);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_params_are_invalid_requests() {
        let err = params_from_value::<RangeParams>(json!({ "startMs": "x" })).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn cancel_kind_is_optional() {
        let all: MediaCancelParams = params_from_value(json!({})).expect("parse");
        assert!(all.kind.is_none());
        let one: MediaCancelParams = params_from_value(json!({ "kind": "waveform" })).expect("parse");
        assert_eq!(one.kind, Some(JobKind::Waveform));
    }

    #[test]
    fn session_methods_share_the_lane() {
        assert!(is_session_request("session.trim"));
        assert!(is_session_request("session.setRange"));
        assert!(!is_session_request("media.cancel"));
        assert!(is_async_request("media.cancel"));
        assert!(!is_async_request("session.pick"));
        assert!(!is_async_request("prefs.get"));
    }

    /// Slow duration lookup, so a request pipelined behind `session.pick` would overtake it
    /// if the lane did not keep order.
    struct SlowDurationBackend;

    impl MediaBackend for SlowDurationBackend {
        fn probe_duration_ms(&self, _source: &Path) -> u64 {
            std::thread::sleep(Duration::from_millis(150));
            60_000
        }

        fn extract_waveform(&self, _source: &Path, _abort: &AbortHandle) -> WaveformEnvelope {
            WaveformEnvelope::default()
        }

        fn trim(
            &self,
            request: &TrimRequest,
            _progress: Option<ProgressCallback>,
            _abort: &AbortHandle,
        ) -> Result<TrimOutput, AppError> {
            Ok(TrimOutput {
                path: PathBuf::from("/out/clip_0.wav"),
                size: 1,
                format: request.format,
                encoder: "pcm_s16le".to_string(),
            })
        }
    }

    struct SilentPlayer;

    impl PreviewPlayer for SilentPlayer {
        fn start(&self, _: &Path, _: u64, _: u64, _: f64) -> Result<(), AppError> {
            Ok(())
        }

        fn position_ms(&self) -> u64 {
            0
        }

        fn is_playing(&self) -> bool {
            false
        }

        fn stop(&self) {}
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request(id: u64, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipelined_set_range_applies_after_pick() {
        let dir = tempfile::tempdir().expect("tempdir");
        let processor = Arc::new(TrimProcessor::new(
            Arc::new(EncoderCapabilities::new(["pcm_s16le"])),
            None,
            dir.path().to_path_buf(),
        ));
        let sidecar = Arc::new(Sidecar {
            processor,
            controller: SessionController::new(Arc::new(SlowDurationBackend), Arc::new(SilentPlayer)),
            prefs: PreferenceStore::new(dir.path().join("preferences.json")),
        });
        let captured = Captured::default();
        let writer: SharedWriter =
            Arc::new(Mutex::new(Box::new(captured.clone()) as Box<dyn Write + Send>));

        let (lane, worker) =
            spawn_session_lane(&Handle::current(), Arc::clone(&sidecar), writer);
        lane.send(request(1, "session.pick", json!({ "inputPath": "/music/song.mp3" })))
            .expect("send pick");
        lane.send(request(2, "session.setRange", json!({ "startMs": 5000, "endMs": 8000 })))
            .expect("send range");
        lane.send(request(3, "session.trim", Value::Null))
            .expect("send trim");
        drop(lane);
        worker.await.expect("lane");

        let state = sidecar.controller.state();
        assert_eq!(state.duration_ms, 60_000);
        assert_eq!((state.start_ms, state.end_ms), (5_000, 8_000));

        let text = String::from_utf8(captured.0.lock().clone()).expect("utf8");
        let responses: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("json line"))
            .filter(|v| v.get("id").is_some())
            .collect();
        let ids: Vec<u64> = responses.iter().filter_map(|v| v["id"].as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(responses[1]["result"]["startMs"], 5_000);
        assert_eq!(responses[2]["result"]["encoder"], "pcm_s16le");
    }
}
