use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the JSON subscriber. `RUST_LOG` wins over `default_directive` when set.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_filter(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Human-readable subscriber routed through the test harness's captured output.
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .try_init()
        .is_ok()
}
