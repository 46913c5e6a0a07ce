//! Tracing initialisation.
//!
//! Installs a `tracing-subscriber` fmt layer with an env-filter. The
//! filter is read from `REVIEWD_LOG` (falling back to `RUST_LOG`), so
//! operators can raise verbosity per module without a rebuild:
//!
//! ```text
//! REVIEWD_LOG=reviewd=debug,reviewd::queue=trace
//! ```

use tracing_subscriber::EnvFilter;

use crate::constants::ENV_LOG_FILTER;

/// Initialise the global tracing subscriber.
///
/// Safe to call once at startup; subsequent calls are ignored (the
/// `try_init` failure is swallowed so tests that race on init don't
/// panic).
pub fn init(default_filter: &str) {
    let filter = std::env::var(ENV_LOG_FILTER)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter.to_string());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .try_init();
}
