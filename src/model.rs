//! Core data model: [`TaskSnapshot`], [`CpuState`] and the thread-state enum
//! the adaptive scheduler uses to track its per-CPU workers.

use std::fmt;

use arrayvec::ArrayVec;

pub type Tid = i32;
pub type Tgid = i32;

/// Thread name as exposed by the kernel (`comm`): at most 15 printable bytes
/// plus a NUL terminator. Stored without the terminator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Comm(ArrayVec<u8, 15>);

impl Comm {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = ArrayVec::new();
        for &b in bytes.iter().take(15) {
            buf.push(b);
        }
        Self(buf)
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for Comm {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One runnable, non-currently-running thread observed on a CPU at snapshot
/// time.
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    pub tid: Tid,
    pub tgid: Tgid,
    pub comm: Comm,
    /// Opaque identity fuzz / logging aid; semantics vary by scheduling
    /// policy and are never interpreted by the detector.
    pub prio: i64,
    pub ctxsw: u64,
    /// Wall-clock seconds of the earliest snapshot in which this thread was
    /// observed as a non-progressing runnable on this CPU.
    pub since: u64,
}

/// Lifecycle of a per-CPU worker spawned by the adaptive scheduler. Powers
/// and aggressive strategies never populate this field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// No dedicated worker owns this CPU; the coordinator monitors it.
    Detached,
    /// A dedicated worker owns this CPU and is actively cycling.
    Running,
    /// The worker has decided to give the CPU back and is shutting down;
    /// the coordinator will observe `Detached` on its next encounter.
    Draining,
}

/// Retained per-CPU working set, carried across cycles by whichever worker
/// currently owns the CPU (the coordinator, in Power/Adaptive-detached, or a
/// dedicated per-CPU worker).
#[derive(Clone, Debug)]
pub struct CpuState {
    pub cpu_id: u32,
    pub nr_running: u32,
    pub nr_rt_running: u32,
    pub waiting: Vec<TaskSnapshot>,
    pub thread_state: ThreadState,
}

impl CpuState {
    pub fn new(cpu_id: u32) -> Self {
        Self {
            cpu_id,
            nr_running: 0,
            nr_rt_running: 0,
            waiting: Vec::new(),
            thread_state: ThreadState::Detached,
        }
    }

    /// `max(now - since)` over the waiting set, used by the adaptive
    /// coordinator to decide when to spawn a dedicated worker. Returns 0 on
    /// an empty waiting list.
    pub fn max_wait(&self, now: u64) -> u64 {
        self.waiting
            .iter()
            .map(|t| now.saturating_sub(t.since))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_truncates_to_fifteen_bytes() {
        let c = Comm::from("a-name-that-is-definitely-too-long-for-comm");
        assert_eq!(c.as_str().len(), 15);
    }

    #[test]
    fn comm_round_trips_short_names() {
        let c = Comm::from("ksoftirqd/0");
        assert_eq!(c.as_str(), "ksoftirqd/0");
    }

    #[test]
    fn max_wait_over_empty_waiting_is_zero() {
        let cpu = CpuState::new(0);
        assert_eq!(cpu.max_wait(1000), 0);
    }

    #[test]
    fn max_wait_picks_the_oldest_since() {
        let mut cpu = CpuState::new(0);
        cpu.waiting.push(TaskSnapshot {
            tid: 1,
            tgid: 1,
            comm: Comm::from("a"),
            prio: 0,
            ctxsw: 0,
            since: 100,
        });
        cpu.waiting.push(TaskSnapshot {
            tid: 2,
            tgid: 2,
            comm: Comm::from("b"),
            prio: 0,
            ctxsw: 0,
            since: 90,
        });
        assert_eq!(cpu.max_wait(150), 60);
    }
}
