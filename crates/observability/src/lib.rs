//! Tracing and logging setup shared by the binaries.

pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, ParseLogFormatError};

/// Initialize process-wide tracing/logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(config: &LogConfig) {
    self::tracing::init(config);
}
