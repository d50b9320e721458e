//! The Power strategy: one thread, one shared runqueue source, a single
//! vectorized deadline boost per cycle across every starved thread found
//! across all monitored CPUs. Requires the deadline elevation method; there
//! is no fixed-priority fallback for this strategy (spec §4.6).

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::boost::BoostEngine;
use crate::config::{Config, Method};
use crate::detect;
use crate::error::EnvironmentError;
use crate::idle_gate::IdleGate;
use crate::merge;
use crate::model::{CpuState, Tid};
use crate::signals::Shutdown;
use crate::source;

use super::now_secs;

pub fn run(config: &Config, engine: &BoostEngine, shutdown: &Shutdown) -> Result<(), EnvironmentError> {
    if engine.method() != Method::Deadline {
        return Err(EnvironmentError::DeadlineUnavailable);
    }

    let mut rq_source = source::build(config.source)?;
    let mut idle_gate = IdleGate::new(config.idle_gate_enabled);
    let mut states: HashMap<u32, CpuState> = config.cpus.iter().map(|&c| (c, CpuState::new(c))).collect();

    while !shutdown.is_set() {
        let now = now_secs();
        let mut all_targets: Vec<Tid> = Vec::new();

        let busy_cpus: Vec<u32> = config
            .cpus
            .iter()
            .copied()
            .filter(|&cpu| idle_gate.is_busy(cpu))
            .collect();

        // One whole-system read serves every busy CPU this cycle, rather
        // than one re-read per CPU (spec §4.6: "a single snapshot serves
        // all CPUs").
        if !busy_cpus.is_empty() {
            match rq_source.snapshot(&busy_cpus, now) {
                Ok(snapshots) => {
                    for &cpu in &busy_cpus {
                        let Some(snap) = snapshots.get(&cpu) else { continue };
                        let state = states.get_mut(&cpu).expect("states seeded from config.cpus");
                        state.nr_running = snap.nr_running;
                        state.nr_rt_running = snap.nr_rt_running;
                        state.waiting = merge::merge(&state.waiting, snap.waiting.clone(), now);

                        let hits: Vec<Tid> = detect::detect(&state.waiting, config, now)
                            .into_iter()
                            .map(|t| t.tid)
                            .collect();
                        all_targets.extend(hits);
                    }
                }
                Err(e) => warn!(error = %e, "snapshot failed; skipping this cycle"),
            }
        }

        super::boost_targets(&all_targets, config, engine, shutdown);

        if !shutdown.sleep(Duration::from_secs(config.granularity_secs)) {
            break;
        }
    }

    rq_source.destroy();
    Ok(())
}
