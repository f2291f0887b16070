use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs the global subscriber. Human-readable output in debug builds,
/// JSON lines in release builds so CI can ingest driver logs.
pub fn init_logging() {
    init_logging_with(DEFAULT_DIRECTIVE, !cfg!(debug_assertions));
}

pub fn init_logging_with(default_directive: &str, json: bool) {
    let filter = env_filter(default_directive);
    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

/// Routes driver logs through the libtest capture so they only show for failing tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_target(false)
        .with_test_writer()
        .try_init();
}
