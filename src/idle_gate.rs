//! The Idle Gate: a cheap per-CPU pre-filter that avoids the far more
//! expensive runqueue snapshot when nothing could have happened on that CPU
//! since last cycle (spec §4.2).

use std::collections::HashMap;

use crate::procfs;

/// Per-CPU retained idle-ticks state. Not process-wide: each Scheduler
/// strategy owns one `IdleGate` (the single Power-strategy worker, or each
/// Adaptive/Aggressive per-CPU worker for its own CPU).
pub struct IdleGate {
    enabled: bool,
    last_idle_ticks: HashMap<u32, u64>,
}

impl IdleGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_idle_ticks: HashMap::new(),
        }
    }

    /// Returns `true` (busy) iff the idle counter strictly increased since
    /// the last observation on this CPU, or this is the first observation,
    /// or the gate is disabled. Returns `false` (idle) only when the
    /// counter is unchanged from a known prior value.
    ///
    /// A failure to read the counter is treated as busy: we would rather
    /// snapshot unnecessarily than silently stop monitoring a CPU.
    pub fn is_busy(&mut self, cpu_id: u32) -> bool {
        if !self.enabled {
            return true;
        }

        let current = match procfs::cpu_idle_ticks(cpu_id) {
            Ok(v) => v,
            Err(_) => return true,
        };

        match self.last_idle_ticks.insert(cpu_id, current) {
            None => true,
            Some(prev) => current > prev,
        }
    }
}
