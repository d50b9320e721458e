//! The Scheduler: dispatches to one of three orchestration strategies and
//! carries the helpers every strategy shares — wall-clock sampling and the
//! detect-then-boost tail end of a cycle (spec §4.6).

pub mod adaptive;
pub mod aggressive;
pub mod power;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::boost::BoostEngine;
use crate::config::{Config, Method, Strategy};
use crate::detect;
use crate::error::EnvironmentError;
use crate::model::Tid;
use crate::signals::Shutdown;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Applies the configured elevation to a cycle's detected targets, or just
/// logs them under `--log-only`. Shared by all three strategies so the
/// log-only short-circuit and method dispatch live in exactly one place.
pub(crate) fn boost_targets(
    targets: &[Tid],
    config: &Config,
    engine: &BoostEngine,
    shutdown: &Shutdown,
) {
    if targets.is_empty() {
        return;
    }

    if config.log_only {
        for &tid in targets {
            info!(tid, "starvation detected (log-only, not boosting)");
        }
        return;
    }

    match engine.method() {
        Method::Deadline => {
            for (tid, result) in engine.boost_vector(targets, shutdown) {
                if let Err(e) = result {
                    warn!(tid, error = %e, "boost failed");
                }
            }
        }
        Method::FixedPriority => {
            for &tid in targets {
                if let Err(e) = engine.boost_one(tid, shutdown) {
                    warn!(tid, error = %e, "boost failed");
                }
            }
        }
    }
}

/// Runs the configured strategy until `shutdown` is requested.
pub fn run(config: Arc<Config>, engine: Arc<BoostEngine>, shutdown: Shutdown) -> Result<(), EnvironmentError> {
    detect::warn_if_fair_server_present();

    match config.strategy {
        Strategy::Power => power::run(&config, &engine, &shutdown),
        Strategy::Adaptive => adaptive::run(config, engine, shutdown),
        Strategy::Aggressive => aggressive::run(config, engine, shutdown),
    }
}
