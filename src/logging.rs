//! # Structured Logging
//!
//! Mode-aware tracing setup. Development mode gets human-readable console
//! output at `info`; production gets JSON output at `error`. `RUST_LOG`
//! overrides either default.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::Mode;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber for the given mode.
///
/// Safe to call more than once, and safe to call from a host application
/// that has already installed its own subscriber: in both cases the
/// existing subscriber is kept.
pub fn init(mode: Mode) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(mode.default_filter()));

        let result = match mode {
            Mode::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .try_init(),
            Mode::Development => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init(),
        };

        if result.is_err() {
            // A global subscriber is already set (likely by the embedding
            // application); keep it.
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}
