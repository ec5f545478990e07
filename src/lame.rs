//! Native MP3 encoder bridge.
//!
//! Used when the resolved FFmpeg build has no MP3 encoder. The clip is decoded to raw
//! s16le PCM by FFmpeg and then handed to libmp3lame, which is loaded at runtime with
//! `libloading`. A missing library is a normal condition: [`native_encoder`] returns `None`.

use std::ffi::{c_int, c_void};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use libloading::Library;

use crate::error::AppError;

/// Samples per channel fed to LAME per call (one MPEG-1 Layer III frame).
const FRAME_SAMPLES: usize = 1152;
/// Worst-case output size for one frame, per the LAME API notes.
const MP3_BUFFER_LEN: usize = FRAME_SAMPLES * 5 / 4 + 7200;

/// Encodes a raw PCM file to MP3.
pub trait Mp3Encoder: Send + Sync {
    fn is_available(&self) -> bool;

    /// `pcm_path` holds interleaved signed 16-bit little-endian samples.
    fn encode_pcm_file(
        &self,
        pcm_path: &Path,
        mp3_path: &Path,
        sample_rate: u32,
        channels: u16,
        bitrate_kbps: u32,
    ) -> Result<(), AppError>;
}

/// Stand-in used when the bridge is disabled or the library is missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMp3Encoder;

impl Mp3Encoder for NoMp3Encoder {
    fn is_available(&self) -> bool {
        false
    }

    fn encode_pcm_file(
        &self,
        _pcm_path: &Path,
        _mp3_path: &Path,
        _sample_rate: u32,
        _channels: u16,
        _bitrate_kbps: u32,
    ) -> Result<(), AppError> {
        Err(AppError::Mp3Encoder(
            "Native MP3 encoder is not available".to_string(),
        ))
    }
}

type LameT = *mut c_void;
type LameInit = unsafe extern "C" fn() -> LameT;
type LameSetInt = unsafe extern "C" fn(LameT, c_int) -> c_int;
type LameInitParams = unsafe extern "C" fn(LameT) -> c_int;
type LameEncodeBuffer =
    unsafe extern "C" fn(LameT, *const i16, *const i16, c_int, *mut u8, c_int) -> c_int;
type LameEncodeInterleaved = unsafe extern "C" fn(LameT, *mut i16, c_int, *mut u8, c_int) -> c_int;
type LameFlush = unsafe extern "C" fn(LameT, *mut u8, c_int) -> c_int;
type LameClose = unsafe extern "C" fn(LameT) -> c_int;

/// Resolved libmp3lame entry points. The function pointers stay valid as long as
/// `_library` is alive, which is the lifetime of this struct.
pub struct LameLibrary {
    init: LameInit,
    set_in_samplerate: LameSetInt,
    set_num_channels: LameSetInt,
    set_brate: LameSetInt,
    init_params: LameInitParams,
    encode_buffer: LameEncodeBuffer,
    encode_interleaved: LameEncodeInterleaved,
    flush: LameFlush,
    close: LameClose,
    _library: Library,
}

fn library_candidates() -> Vec<String> {
    if let Ok(path) = std::env::var("LAME_LIBRARY_PATH")
        && !path.trim().is_empty()
    {
        return vec![path];
    }
    let names: &[&str] = if cfg!(target_os = "windows") {
        &["libmp3lame.dll", "mp3lame.dll"]
    } else if cfg!(target_os = "macos") {
        &[
            "libmp3lame.0.dylib",
            "libmp3lame.dylib",
            "/opt/homebrew/lib/libmp3lame.dylib",
            "/usr/local/lib/libmp3lame.dylib",
        ]
    } else {
        &["libmp3lame.so.0", "libmp3lame.so"]
    };
    names.iter().map(|s| s.to_string()).collect()
}

macro_rules! load_symbol {
    ($lib:expr, $ty:ty, $name:literal) => {{
        // SAFETY: the declared signature matches lame.h for this symbol.
        let symbol = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
            .map_err(|e| AppError::Mp3Encoder(format!("Missing symbol {}: {}", $name, e)))?;
        *symbol
    }};
}

impl LameLibrary {
    /// Load libmp3lame from an explicit path or library name.
    pub fn load(name: impl AsRef<std::ffi::OsStr>) -> Result<Self, AppError> {
        let name = name.as_ref();
        // SAFETY: loading libmp3lame runs no initialisation code with preconditions.
        let library = unsafe { Library::new(name) }.map_err(|e| {
            AppError::Mp3Encoder(format!("Failed to load {}: {}", name.to_string_lossy(), e))
        })?;
        let init = load_symbol!(library, LameInit, "lame_init");
        let set_in_samplerate = load_symbol!(library, LameSetInt, "lame_set_in_samplerate");
        let set_num_channels = load_symbol!(library, LameSetInt, "lame_set_num_channels");
        let set_brate = load_symbol!(library, LameSetInt, "lame_set_brate");
        let init_params = load_symbol!(library, LameInitParams, "lame_init_params");
        let encode_buffer = load_symbol!(library, LameEncodeBuffer, "lame_encode_buffer");
        let encode_interleaved = load_symbol!(
            library,
            LameEncodeInterleaved,
            "lame_encode_buffer_interleaved"
        );
        let flush = load_symbol!(library, LameFlush, "lame_encode_flush");
        let close = load_symbol!(library, LameClose, "lame_close");
        Ok(Self {
            init,
            set_in_samplerate,
            set_num_channels,
            set_brate,
            init_params,
            encode_buffer,
            encode_interleaved,
            flush,
            close,
            _library: library,
        })
    }

    /// First loadable candidate, honouring `LAME_LIBRARY_PATH`.
    pub fn discover() -> Option<Self> {
        for candidate in library_candidates() {
            match Self::load(&candidate) {
                Ok(lib) => {
                    log::info!(
                        target: "audio_trim::lame",
                        "Loaded native MP3 encoder from {}",
                        candidate
                    );
                    return Some(lib);
                }
                Err(e) => log::trace!(target: "audio_trim::lame", "{}", e),
            }
        }
        log::debug!(
            target: "audio_trim::lame",
            "libmp3lame not found; native MP3 encoding disabled"
        );
        None
    }
}

/// Owns one `lame_t`; closes it on drop.
struct LameSession<'a> {
    lib: &'a LameLibrary,
    handle: LameT,
}

impl Drop for LameSession<'_> {
    fn drop(&mut self) {
        // SAFETY: handle came from lame_init and is closed exactly once.
        unsafe {
            (self.lib.close)(self.handle);
        }
    }
}

/// Little-endian byte chunk to samples. A dangling odd byte is ignored.
fn le_bytes_to_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Read until `buf` is full or EOF. Returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl Mp3Encoder for LameLibrary {
    fn is_available(&self) -> bool {
        true
    }

    fn encode_pcm_file(
        &self,
        pcm_path: &Path,
        mp3_path: &Path,
        sample_rate: u32,
        channels: u16,
        bitrate_kbps: u32,
    ) -> Result<(), AppError> {
        let channels = channels.max(1);
        let mut reader = BufReader::new(File::open(pcm_path)?);
        let mut writer = BufWriter::new(File::create(mp3_path)?);

        // SAFETY: lame_init has no preconditions; a null return is handled.
        let handle = unsafe { (self.init)() };
        if handle.is_null() {
            return Err(AppError::Mp3Encoder("lame_init failed".to_string()));
        }
        let session = LameSession { lib: self, handle };

        // SAFETY: handle is a live lame_t owned by `session`.
        let params_ok = unsafe {
            (self.set_in_samplerate)(session.handle, sample_rate as c_int);
            (self.set_num_channels)(session.handle, c_int::from(channels));
            (self.set_brate)(session.handle, bitrate_kbps as c_int);
            (self.init_params)(session.handle) >= 0
        };
        if !params_ok {
            return Err(AppError::Mp3Encoder(format!(
                "lame_init_params rejected {} Hz, {} ch, {} kbps",
                sample_rate, channels, bitrate_kbps
            )));
        }

        let frame_bytes = FRAME_SAMPLES * usize::from(channels) * 2;
        let mut pcm = vec![0u8; frame_bytes];
        let mut samples: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * usize::from(channels));
        let mut mp3 = vec![0u8; MP3_BUFFER_LEN];

        loop {
            let read = read_full(&mut reader, &mut pcm)?;
            let whole = read - read % (usize::from(channels) * 2);
            if whole == 0 {
                break;
            }
            le_bytes_to_samples(&pcm[..whole], &mut samples);
            let frames = (samples.len() / usize::from(channels)) as c_int;
            // SAFETY: `samples` holds `frames * channels` values and `mp3` is MP3_BUFFER_LEN long.
            let encoded = unsafe {
                if channels == 1 {
                    (self.encode_buffer)(
                        session.handle,
                        samples.as_ptr(),
                        samples.as_ptr(),
                        frames,
                        mp3.as_mut_ptr(),
                        MP3_BUFFER_LEN as c_int,
                    )
                } else {
                    (self.encode_interleaved)(
                        session.handle,
                        samples.as_mut_ptr(),
                        frames,
                        mp3.as_mut_ptr(),
                        MP3_BUFFER_LEN as c_int,
                    )
                }
            };
            if encoded < 0 {
                return Err(AppError::Mp3Encoder(format!(
                    "lame_encode_buffer failed ({})",
                    encoded
                )));
            }
            writer.write_all(&mp3[..encoded as usize])?;
            if read < frame_bytes {
                break;
            }
        }

        // SAFETY: same buffer bounds as above.
        let flushed =
            unsafe { (self.flush)(session.handle, mp3.as_mut_ptr(), MP3_BUFFER_LEN as c_int) };
        if flushed > 0 {
            writer.write_all(&mp3[..flushed as usize])?;
        }
        writer.flush()?;
        drop(session);

        log::debug!(
            target: "audio_trim::lame",
            "Encoded {} -> {}",
            pcm_path.display(),
            mp3_path.display()
        );
        Ok(())
    }
}

static NATIVE_ENCODER: OnceLock<Option<Arc<LameLibrary>>> = OnceLock::new();

/// Process-wide native encoder, discovered once. `None` when libmp3lame is absent
/// or the `no-native-mp3` feature is on.
pub fn native_encoder() -> Option<Arc<dyn Mp3Encoder>> {
    if cfg!(feature = "no-native-mp3") {
        return None;
    }
    NATIVE_ENCODER
        .get_or_init(|| LameLibrary::discover().map(Arc::new))
        .clone()
        .map(|lib| lib as Arc<dyn Mp3Encoder>)
}
