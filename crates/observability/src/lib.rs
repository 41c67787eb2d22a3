//! Process-wide tracing setup shared by binaries and tests.

/// Initialize process-wide structured logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Filter construction and subscriber installation.
pub mod tracing;

pub use self::tracing::{init_for_tests, init_with_default};
