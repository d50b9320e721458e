//! The Adaptive strategy: a coordinator thread cycles every monitored CPU
//! using one shared runqueue source, detecting only — it never boosts
//! directly. A CPU whose longest wait crosses half the starvation threshold
//! gets a dedicated worker thread (spec §4.6, §8 worked scenario 3), which
//! owns that CPU exclusively — including its own runqueue source instance
//! and its own boosting — until it observes enough quiet cycles to hand the
//! CPU back.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::boost::BoostEngine;
use crate::config::Config;
use crate::detect;
use crate::error::EnvironmentError;
use crate::idle_gate::IdleGate;
use crate::merge;
use crate::model::{CpuState, ThreadState, Tid};
use crate::signals::Shutdown;
use crate::source;

use super::now_secs;

/// Consecutive quiet cycles a dedicated worker requires before draining and
/// handing the CPU back to the coordinator.
const DRAIN_AFTER_CONSECUTIVE_QUIET: u32 = 3;

/// Whether a CPU's longest-waiting thread has gone long enough without
/// progress to warrant promoting it to a dedicated worker: half the
/// starvation threshold, so the worker is in place well before anything on
/// the CPU actually crosses into starvation (spec §4.6 step 2, §8 scenario
/// 3: threshold 5s, spawn at t≈2.5s).
fn should_spawn(max_wait: u64, threshold_secs: u64) -> bool {
    max_wait >= threshold_secs / 2
}

pub fn run(config: Arc<Config>, engine: Arc<BoostEngine>, shutdown: Shutdown) -> Result<(), EnvironmentError> {
    let mut rq_source = source::build(config.source)?;
    let mut idle_gate = IdleGate::new(config.idle_gate_enabled);
    let mut states: HashMap<u32, CpuState> = config.cpus.iter().map(|&c| (c, CpuState::new(c))).collect();

    let (tx, rx) = mpsc::channel::<(u32, CpuState)>();
    let mut workers: HashMap<u32, JoinHandle<()>> = HashMap::new();

    while !shutdown.is_set() {
        while let Ok((cpu, returned)) = rx.try_recv() {
            states.insert(cpu, returned);
            if let Some(handle) = workers.remove(&cpu) {
                let _ = handle.join();
            }
        }

        let now = now_secs();
        for &cpu in &config.cpus {
            if workers.contains_key(&cpu) {
                continue; // owned by a dedicated worker this cycle
            }

            let state = states.get_mut(&cpu).expect("states seeded from config.cpus");
            if !idle_gate.is_busy(cpu) {
                continue;
            }

            match rq_source.snapshot(&[cpu], now) {
                Ok(snapshots) => {
                    let Some(snap) = snapshots.get(&cpu) else { continue };
                    state.nr_running = snap.nr_running;
                    state.nr_rt_running = snap.nr_rt_running;
                    state.waiting = merge::merge(&state.waiting, snap.waiting.clone(), now);

                    // Detection only: the coordinator never boosts. A CPU
                    // crosses this line well before any thread on it
                    // reaches the full starvation threshold, so by the time
                    // detect::detect would report a hit here, a dedicated
                    // worker has already taken over boosting for it.
                    if should_spawn(state.max_wait(now), config.threshold_secs) {
                        state.thread_state = ThreadState::Running;
                        let handle = spawn_worker(
                            cpu,
                            state.clone(),
                            Arc::clone(&config),
                            Arc::clone(&engine),
                            shutdown.clone(),
                            tx.clone(),
                        );
                        workers.insert(cpu, handle);
                    }
                }
                Err(e) => warn!(cpu, error = %e, "snapshot failed; skipping this cpu this cycle"),
            }
        }

        if !shutdown.sleep(Duration::from_secs(config.granularity_secs)) {
            break;
        }
    }

    for (cpu, handle) in workers {
        let _ = handle.join();
        info!(cpu, "joined dedicated worker during shutdown");
    }
    rq_source.destroy();
    Ok(())
}

/// A dedicated per-CPU worker: builds its own runqueue source and idle gate,
/// cycles only its own CPU, and reports its final `CpuState` back to the
/// coordinator once it decides to drain.
fn spawn_worker(
    cpu: u32,
    mut state: CpuState,
    config: Arc<Config>,
    engine: Arc<BoostEngine>,
    shutdown: Shutdown,
    tx: mpsc::Sender<(u32, CpuState)>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut rq_source = match source::build(config.source) {
            Ok(s) => s,
            Err(e) => {
                warn!(cpu, error = %e, "dedicated worker failed to open its own runqueue source; draining immediately");
                state.thread_state = ThreadState::Detached;
                let _ = tx.send((cpu, state));
                return;
            }
        };
        let mut idle_gate = IdleGate::new(config.idle_gate_enabled);
        let mut quiet_cycles = 0u32;

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

                            if hits.is_empty() {
                                quiet_cycles += 1;
                            } else {
                                quiet_cycles = 0;
                                super::boost_targets(&hits, &config, &engine, &shutdown);
                            }
                        }
                    }
                    Err(e) => warn!(cpu, error = %e, "dedicated worker snapshot failed"),
                }
            } else {
                quiet_cycles += 1;
            }

            if quiet_cycles >= DRAIN_AFTER_CONSECUTIVE_QUIET {
                break;
            }
            if !shutdown.sleep(Duration::from_secs(config.granularity_secs)) {
                break;
            }
        }

        rq_source.destroy();
        state.thread_state = ThreadState::Detached;
        let _ = tx.send((cpu, state));
    })
}
