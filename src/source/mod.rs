//! The Runqueue Source abstraction (spec §4.1): a sum type over two
//! concrete backends rather than an inheritance hierarchy, matching how the
//! rest of this codebase represents "one interface, a handful of
//! kernel-version-dependent concrete shapes."

pub mod text;
pub mod tracepoint;

use std::collections::HashMap;

use crate::error::{EnvironmentError, SourceError};
use crate::model::TaskSnapshot;

/// One CPU's freshly observed runqueue contents. `waiting` carries
/// placeholder `since` values (the current wall-clock `now`); the Task
/// Merger is solely responsible for deciding the real value.
#[derive(Clone, Debug, Default)]
pub struct CpuSnapshot {
    pub nr_running: u32,
    pub nr_rt_running: u32,
    pub waiting: Vec<TaskSnapshot>,
}

/// Common contract every backend satisfies: identity (`tid`) plus a
/// progress counter (`ctxsw`). The core never assumes more than this in
/// common code (spec §4.1).
pub trait RunqueueSource: Send {
    /// One-shot setup; may fail with a reason signalling this backend is
    /// unavailable on this host.
    fn init(&mut self) -> Result<(), SourceError>;

    /// Produces fresh snapshots for exactly the requested CPUs. Whole-system
    /// backends (the textual source) read once and filter down; per-CPU
    /// backends (the tracepoint source) read one map per requested CPU.
    fn snapshot(&mut self, cpus: &[u32], now: u64) -> Result<HashMap<u32, CpuSnapshot>, SourceError>;

    /// Cheap pre-filter: does this snapshot contain anything that could
    /// possibly be starving? Used by the Scheduler to skip detection work
    /// on a quiet CPU.
    fn has_starving_candidate(&self, snapshot: &CpuSnapshot) -> bool {
        !snapshot.waiting.is_empty()
    }

    fn destroy(&mut self) {}
}

/// Builds the configured backend. `Auto` tries the textual source first,
/// then the tracepoint source, matching the corpus's convention of picking
/// one concrete backend at startup with no mid-run fallback (spec §9, Open
/// Question).
pub fn build(kind: crate::config::SourceKind) -> Result<Box<dyn RunqueueSource>, EnvironmentError> {
    use crate::config::SourceKind;

    let try_text = || -> Result<Box<dyn RunqueueSource>, SourceError> {
        let mut src = text::TextSource::new();
        src.init()?;
        Ok(Box::new(src))
    };
    let try_tracepoint = || -> Result<Box<dyn RunqueueSource>, SourceError> {
        let mut src = tracepoint::TracepointSource::new();
        src.init()?;
        Ok(Box::new(src))
    };

    match kind {
        SourceKind::Text => try_text().map_err(|e| EnvironmentError::NoSourceAvailable {
            text_err: e.to_string(),
            tp_err: "not attempted".to_string(),
        }),
        SourceKind::Tracepoint => try_tracepoint().map_err(|e| EnvironmentError::NoSourceAvailable {
            text_err: "not attempted".to_string(),
            tp_err: e.to_string(),
        }),
        SourceKind::Auto => match try_text() {
            Ok(src) => Ok(src),
            Err(text_err) => try_tracepoint().map_err(|tp_err| EnvironmentError::NoSourceAvailable {
                text_err: text_err.to_string(),
                tp_err: tp_err.to_string(),
            }),
        },
    }
}
