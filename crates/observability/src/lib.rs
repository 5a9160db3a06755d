//! Process-wide logging setup shared by binaries and tests.

/// Initialize structured logging with the default `info` level.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init("info");
}

/// Subscriber construction and filtering.
pub mod tracing;
