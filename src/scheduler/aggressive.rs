//! The Aggressive strategy: one dedicated worker thread per monitored CPU,
//! spawned at startup and never torn down while the daemon runs (spec
//! §4.6). Each worker owns its own runqueue source instance exclusively, so
//! there is no coordinator and no promotion/demotion bookkeeping.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::boost::BoostEngine;
use crate::config::Config;
use crate::detect;
use crate::error::EnvironmentError;
use crate::idle_gate::IdleGate;
use crate::merge;
use crate::model::{CpuState, Tid};
use crate::signals::Shutdown;
use crate::source;

use super::now_secs;

pub fn run(config: Arc<Config>, engine: Arc<BoostEngine>, shutdown: Shutdown) -> Result<(), EnvironmentError> {
    let handles: Vec<JoinHandle<()>> = config
        .cpus
        .iter()
        .map(|&cpu| spawn_worker(cpu, Arc::clone(&config), Arc::clone(&engine), shutdown.clone()))
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn spawn_worker(cpu: u32, config: Arc<Config>, engine: Arc<BoostEngine>, shutdown: Shutdown) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut rq_source = match source::build(config.source) {
            Ok(s) => s,
            Err(e) => {
                warn!(cpu, error = %e, "worker failed to open its runqueue source; this cpu is unmonitored");
                return;
            }
        };
        let mut idle_gate = IdleGate::new(config.idle_gate_enabled);
        let mut state = CpuState::new(cpu);

        while !shutdown.is_set() {
            let now = now_secs();

            if idle_gate.is_busy(cpu) {
                match rq_source.snapshot(&[cpu], now) {
                    Ok(snapshots) => {
                        if let Some(snap) = snapshots.get(&cpu) {
                            state.nr_running = snap.nr_running;
                            state.nr_rt_running = snap.nr_rt_running;
                            state.waiting = merge::merge(&state.waiting, snap.waiting.clone(), now);

                            let hits: Vec<Tid> = detect::detect(&state.waiting, &config, now)
                                .into_iter()
                                .map(|t| t.tid)
                                .collect();
                            super::boost_targets(&hits, &config, &engine, &shutdown);
                        }
                    }
                    Err(e) => warn!(cpu, error = %e, "snapshot failed; skipping this cycle"),
                }
            }

            if !shutdown.sleep(Duration::from_secs(config.granularity_secs)) {
                break;
            }
        }

        rq_source.destroy();
    })
}
