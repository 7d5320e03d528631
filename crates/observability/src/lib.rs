//! Process-wide logging setup shared by the HRIS binaries.

/// Initialize structured logging with the format chosen by `HRIS_LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    crate::tracing::init(crate::tracing::LogFormat::from_env());
}

/// Subscriber construction (filters, output format).
pub mod tracing;

