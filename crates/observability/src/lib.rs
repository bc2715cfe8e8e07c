//! Tracing/logging setup shared by the fieldops binaries.

/// Initialize process-wide logging.
///
/// The format comes from `FIELDOPS_LOG_FORMAT` (`json` or `pretty`) and
/// defaults to JSON. Safe to call multiple times; subsequent calls become
/// no-ops.
pub fn init() {
    tracing::init(tracing::format_from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::LogFormat;
