//! Tracing/logging initialization.
//!
//! All entry points are safe to call multiple times; once a global
//! subscriber is installed, later calls are no-ops.

use tracing_subscriber::EnvFilter;

/// JSON logs with `RUST_LOG` filtering, defaulting to `info`.
pub fn init() {
    init_with_default_filter("info");
}

/// Same as [`init`], with a custom directive used when `RUST_LOG` is unset
/// or invalid (e.g. `"shopledger_infra=debug,sqlx=warn"`).
pub fn init_with_default_filter(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}

/// Human-readable output captured by the test harness; quiet unless
/// `RUST_LOG` asks for more.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        init_for_tests();
        init_for_tests();
        init();
        tracing::info!("still logging");
    }
}
