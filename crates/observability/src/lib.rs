//! Process-wide logging setup shared by the `millstock` binaries.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize structured JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize logging with an explicit output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}
