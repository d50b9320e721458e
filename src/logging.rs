//! `tracing-subscriber` initialization (spec §4.10). The verbosity-to-filter
//! mapping lives on [`crate::config::Cli::log_filter`]; this module only
//! wires the resulting directive into a global subscriber.

use tracing_subscriber::EnvFilter;

/// Installs a global subscriber. `RUST_LOG`, if set, takes precedence over
/// `default_directive` entirely (the usual `EnvFilter` behavior).
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
