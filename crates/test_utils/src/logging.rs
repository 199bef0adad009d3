//! Tracing bootstrap for tests
//!
//! Library crates never install a subscriber. Tests call
//! `init_test_tracing()` to see the engine's spans, filtered by `RUST_LOG`
//! (default `warn`). Set `TEST_LOG_JSON=1` for JSON lines.

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer();

    let result = if std::env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // Another harness may already own the global subscriber
    let _ = result;
});

/// Installs the test subscriber once per process
pub fn init_test_tracing() {
    Lazy::force(&TRACING);
}
