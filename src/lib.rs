pub mod controller;
pub mod error;
pub mod ffmpeg;
pub mod format;
pub mod lame;
pub mod logging;
pub mod paths;
pub mod playback;
pub mod preferences;
pub mod session;
pub mod sidecar_api;
#[cfg(feature = "integration-test-api")]
pub mod test_support;
pub mod trim;
pub mod waveform;

pub use controller::{JobKind, SessionController};
pub use format::{FormatInfo, OutputFormat, QualityPreset};
pub use session::{SessionEvent, SessionState};
pub use trim::{TrimOutput, TrimProcessor};
