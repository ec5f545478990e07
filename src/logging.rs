//! Stderr logger: `HH:MM:SS  LEVEL  target  message`, crate prefix stripped from targets.

use std::io::Write;

use log::LevelFilter;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const TARGET_PREFIX: &str = "audio_trim::";
const CLOCK_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Local offset, falling back to UTC when the platform cannot determine it.
/// Reading it is only reliable before other threads exist.
fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

fn format_clock(now: OffsetDateTime) -> String {
    now.format(CLOCK_FORMAT).unwrap_or_else(|_| "??:??:??".into())
}

fn clock_now(offset: UtcOffset) -> String {
    format_clock(OffsetDateTime::now_utc().to_offset(offset))
}

pub(crate) fn short_target(target: &str) -> &str {
    target
        .strip_prefix(TARGET_PREFIX)
        .or_else(|| target.strip_prefix("audio_trim_core::"))
        .unwrap_or(target)
}

/// Installs the global logger. `RUST_LOG` overrides the build default. Safe to call twice.
///
/// Call before spawning threads so the local offset can be captured.
pub fn init_logging() {
    let offset = local_offset();
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level())
        .parse_env("RUST_LOG")
        .target(env_logger::Target::Stderr)
        .format(move |buf, record| {
            writeln!(
                buf,
                "{}  {:5}  {:5}  {}",
                clock_now(offset),
                record.level(),
                short_target(record.target()),
                record.args()
            )
        });
    if builder.try_init().is_err() {
        log::debug!(target: "audio_trim::logging", "Logger already installed");
    }
}
