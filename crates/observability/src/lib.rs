//! Process-wide tracing setup shared by the stockroom crates.

/// Log subscriber installation (JSON output, `RUST_LOG` filtering).
pub mod logging;

pub use logging::{init_for_tests, init_with_filter};

/// Initialize process-wide logging with the default `info` filter.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    logging::init_with_filter(logging::DEFAULT_FILTER);
}
