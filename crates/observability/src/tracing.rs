//! Tracing/logging initialization.
//!
//! Production output is one JSON object per event. The filter comes from
//! `RUST_LOG` and falls back to a default directive; `audit` is a dedicated
//! target so audit events can be routed or silenced separately, e.g.
//! `RUST_LOG=info,audit=off`.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// JSON logs with timestamps and targets, filter from `RUST_LOG` or "info".
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// Same as [`init`] with a caller-chosen fallback directive.
pub fn init_with_default(default: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .try_init();
}

/// Human-readable output captured by the test harness. Quiet unless `RUST_LOG` is set.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("warn"))
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
        init();
        init_with_default("debug");
        tracing::info!(target: "audit", action = "noop", "still logging");
    }
}
