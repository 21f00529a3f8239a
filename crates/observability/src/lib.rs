//! Tracing/logging setup shared by the binaries and tests.

/// Initialize process-wide logging with the default settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogConfig::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
