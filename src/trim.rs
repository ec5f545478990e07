//! Trim orchestration: scratch copy, engine run (or native MP3 path), validation.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::ffmpeg::{
    AbortHandle, DECODE_CHANNELS, DECODE_SAMPLE_RATE, EncoderCapabilities, ProgressCallback,
    ScratchFile, TrimRequest, build_pcm_decode_args, build_trim_arguments, get_supported_encoders,
    path_to_string, run_ffmpeg_blocking, select_encoder, verify_output,
};
use crate::format::{OutputFormat, supported_formats};
use crate::lame::{Mp3Encoder, native_encoder};
use crate::paths;

/// Share of overall progress given to the decode step on the native MP3 path.
const NATIVE_DECODE_SHARE: f64 = 0.85;

/// Where trim input bytes come from. Sources need not be path-addressable.
pub trait MediaSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Extension hint for the scratch copy so FFmpeg can pick a demuxer.
    fn extension_hint(&self) -> Option<String> {
        None
    }
}

/// A plain file on disk.
#[derive(Debug, Clone)]
pub struct FileSource(pub PathBuf);

impl MediaSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.0)?))
    }

    fn extension_hint(&self) -> Option<String> {
        self.0
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Result of a successful trim.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimOutput {
    pub path: PathBuf,
    pub size: u64,
    pub format: OutputFormat,
    /// Engine encoder name, or `"lame"` for the native path.
    pub encoder: String,
}

/// Runs trims against one capability set and output directory.
pub struct TrimProcessor {
    encoders: Arc<EncoderCapabilities>,
    mp3: Option<Arc<dyn Mp3Encoder>>,
    output_dir: PathBuf,
}

impl TrimProcessor {
    pub fn new(
        encoders: Arc<EncoderCapabilities>,
        mp3: Option<Arc<dyn Mp3Encoder>>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            encoders,
            mp3,
            output_dir,
        }
    }

    /// Probed encoders, discovered native encoder and the default output directory.
    pub fn from_environment() -> Result<Self, AppError> {
        Ok(Self::new(
            get_supported_encoders(),
            native_encoder(),
            paths::output_dir()?,
        ))
    }

    pub fn encoders(&self) -> &EncoderCapabilities {
        &self.encoders
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn native_mp3_available(&self) -> bool {
        self.mp3.as_ref().is_some_and(|m| m.is_available())
    }

    pub fn supported_formats(&self) -> Vec<OutputFormat> {
        supported_formats(self.encoders.as_set(), self.native_mp3_available())
    }

    /// MP3 requested, no engine MP3 encoder, native encoder present.
    pub fn uses_native_mp3(&self, format: OutputFormat) -> bool {
        format == OutputFormat::Mp3
            && self.native_mp3_available()
            && !format
                .encoder_candidates()
                .iter()
                .any(|c| self.encoders.contains(c))
    }

    /// Engine arguments that a trim of `request` would run, for display.
    pub fn command_preview(
        &self,
        request: &TrimRequest,
        input_path: &str,
        output_path: &str,
    ) -> Result<Vec<String>, AppError> {
        if self.uses_native_mp3(request.format) {
            build_pcm_decode_args(request, input_path, output_path)
        } else {
            build_trim_arguments(request, input_path, output_path, &self.encoders)
        }
    }

    /// Trim the file at `request.source`.
    pub fn trim(
        &self,
        request: &TrimRequest,
        progress: Option<ProgressCallback>,
        abort: Option<&AbortHandle>,
    ) -> Result<TrimOutput, AppError> {
        self.trim_from(&FileSource(request.source.clone()), request, progress, abort)
    }

    pub fn trim_from(
        &self,
        source: &dyn MediaSource,
        request: &TrimRequest,
        progress: Option<ProgressCallback>,
        abort: Option<&AbortHandle>,
    ) -> Result<TrimOutput, AppError> {
        request.validate()?;
        let native = self.uses_native_mp3(request.format);
        let encoder = if native {
            "lame"
        } else {
            select_encoder(request.format, &self.encoders)?
        };

        let input = copy_to_scratch(source)?;
        if abort.is_some_and(AbortHandle::is_aborted) {
            return Err(AppError::aborted());
        }
        fs::create_dir_all(&self.output_dir)?;
        let output = paths::clip_output_path(&self.output_dir, request.format);

        log::info!(
            target: "audio_trim::trim",
            "Trim {}..{}ms x{} -> {} via {}",
            request.start_ms,
            request.end_ms,
            request.speed,
            output.display(),
            encoder
        );

        let result = if native {
            self.encode_native_mp3(request, input.path(), &output, progress, abort)
        } else {
            let args = build_trim_arguments(
                request,
                &path_to_string(input.path()),
                &path_to_string(&output),
                &self.encoders,
            )?;
            run_ffmpeg_blocking(args, Some(request.output_duration_secs()), progress, abort)
        };
        drop(input);

        match result.and_then(|()| verify_output(&output)) {
            Ok(size) => Ok(TrimOutput {
                path: output,
                size,
                format: request.format,
                encoder: encoder.to_string(),
            }),
            Err(e) => {
                let _ = fs::remove_file(&output);
                Err(e)
            }
        }
    }

    fn encode_native_mp3(
        &self,
        request: &TrimRequest,
        input: &Path,
        output: &Path,
        progress: Option<ProgressCallback>,
        abort: Option<&AbortHandle>,
    ) -> Result<(), AppError> {
        let Some(mp3) = self.mp3.as_ref() else {
            return Err(AppError::Mp3Encoder(
                "Native MP3 encoder is not available".to_string(),
            ));
        };
        let pcm = ScratchFile::new("pcm_", "raw")?;
        let args = build_pcm_decode_args(
            request,
            &path_to_string(input),
            &path_to_string(pcm.path()),
        )?;
        let decode_progress: Option<ProgressCallback> = progress.clone().map(|cb| {
            Arc::new(move |p: f64| cb(p * NATIVE_DECODE_SHARE)) as ProgressCallback
        });
        run_ffmpeg_blocking(
            args,
            Some(request.output_duration_secs()),
            decode_progress,
            abort,
        )?;
        if abort.is_some_and(AbortHandle::is_aborted) {
            return Err(AppError::aborted());
        }
        mp3.encode_pcm_file(
            pcm.path(),
            output,
            DECODE_SAMPLE_RATE,
            DECODE_CHANNELS,
            request.quality.bitrate_kbps(),
        )?;
        if let Some(cb) = progress {
            cb(1.0);
        }
        Ok(())
    }
}

/// Copy the source into a private scratch file. Open failures are `SourceUnavailable`.
fn copy_to_scratch(source: &dyn MediaSource) -> Result<ScratchFile, AppError> {
    let mut reader = source
        .open()
        .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;
    let ext = source.extension_hint().unwrap_or_else(|| "tmp".to_string());
    let scratch = ScratchFile::new("audio_src_", &ext)?;
    let mut writer = BufWriter::new(File::create(scratch.path())?);
    io::copy(&mut reader, &mut writer)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(scratch)
}
