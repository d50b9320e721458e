//! The Boost Engine: saves a target's original scheduling attributes,
//! applies a bounded-duration elevation, and restores them — or decays
//! back to them, under fixed-priority emulation — with documented failure
//! semantics (spec §4.5).

pub mod sched;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Method;
use crate::model::Tid;
use crate::signals::Shutdown;
use sched::{SchedAttr, SchedBackend};

/// Failure to even open a session: the precondition was violated, or step 2
/// of the boost sequence (applying the elevated attributes) failed. In
/// either case no restoration is needed because no attribute was ever
/// changed.
#[derive(Debug, Error)]
pub enum BoostError {
    #[error("tid {0} already has an active boost session")]
    AlreadyBoosted(Tid),

    #[error("failed to read original scheduling attributes for tid {0}: {1}")]
    ReadFailed(Tid, std::io::Error),

    #[error("failed to apply boosted scheduling attributes to tid {0}: {1}")]
    ApplyFailed(Tid, std::io::Error),
}

/// How a boost session that *did* open concluded. Every variant implies
/// `active_boosters` has been cleared for this tid before the call returns
/// (spec invariant: every opened session is closed on every path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostOutcome {
    /// Restoration succeeded; the target is back on its original policy.
    Restored,
    /// The target exited before restoration could be applied. Logged at
    /// info, not treated as fatal.
    TargetVanished,
    /// Restoration failed for a reason other than the target exiting.
    /// Logged at warn, not treated as fatal.
    RestoreFailed,
}

/// Process-wide set of tids currently under an open boost session. The
/// only shared mutable structure in the core besides the shutdown flag
/// (spec §5).
#[derive(Clone, Default)]
pub struct ActiveBoosters(Arc<Mutex<HashSet<Tid>>>);

impl ActiveBoosters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic test-and-set: returns `true` if this call acquired the tid,
    /// `false` if another session already holds it.
    fn try_acquire(&self, tid: Tid) -> bool {
        let mut set = self.0.lock().unwrap();
        set.insert(tid)
    }

    fn release(&self, tid: Tid) {
        self.0.lock().unwrap().remove(&tid);
    }

    #[cfg(test)]
    pub fn contains(&self, tid: Tid) -> bool {
        self.0.lock().unwrap().contains(&tid)
    }
}

/// Restoration failure is never propagated as an error: it is classified,
/// logged, and folded into the session's `BoostOutcome` so the invariant
/// "every opened session is closed" always holds.
fn classify_restore_failure(tid: Tid, err: std::io::Error) -> BoostOutcome {
    if err.raw_os_error() == Some(libc::ESRCH) {
        info!(cpu_tid = tid, error = %err, "target exited before boost restoration; session closed");
        BoostOutcome::TargetVanished
    } else {
        warn!(cpu_tid = tid, error = %err, "failed to restore scheduling attributes; session closed");
        BoostOutcome::RestoreFailed
    }
}

pub struct BoostEngine {
    backend: Arc<dyn SchedBackend>,
    active: ActiveBoosters,
    method: Method,
    deadline_runtime_ns: u64,
    deadline_period_ns: u64,
    fixed_priority: i32,
    boost_duration: Duration,
}

impl BoostEngine {
    pub fn new(
        backend: Arc<dyn SchedBackend>,
        active: ActiveBoosters,
        method: Method,
        deadline_runtime_ns: u64,
        deadline_period_ns: u64,
        fixed_priority: i32,
        boost_duration: Duration,
    ) -> Self {
        Self {
            backend,
            active,
            method,
            deadline_runtime_ns,
            deadline_period_ns,
            fixed_priority,
            boost_duration,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Opens and runs one boost session for `tid`, dispatching to the
    /// configured elevation method. Blocks for up to `boost_duration`
    /// (possibly cut short by `shutdown`).
    pub fn boost_one(&self, tid: Tid, shutdown: &Shutdown) -> Result<BoostOutcome, BoostError> {
        match self.method {
            Method::Deadline => self.deadline_boost(tid, shutdown),
            Method::FixedPriority => self.fixed_priority_boost(tid, shutdown),
        }
    }

    fn deadline_boost(&self, tid: Tid, shutdown: &Shutdown) -> Result<BoostOutcome, BoostError> {
        let saved = self.open_deadline_session(tid)?;
        shutdown.sleep(self.boost_duration);
        Ok(self.close_session(tid, &saved))
    }

    /// Steps 1-2 of the deadline sequence: acquire `active_boosters`, save
    /// the original attributes, and apply the elevated ones. On any
    /// failure `active_boosters` is cleared and no session is considered
    /// open (spec §4.5: "If step 2 fails, active_boosters[tid] MUST be
    /// cleared and the failure surfaced; no session is opened").
    fn open_deadline_session(&self, tid: Tid) -> Result<SchedAttr, BoostError> {
        if !self.active.try_acquire(tid) {
            return Err(BoostError::AlreadyBoosted(tid));
        }

        let saved = match self.backend.get_attr(tid) {
            Ok(attr) => attr,
            Err(e) => {
                self.active.release(tid);
                return Err(BoostError::ReadFailed(tid, e));
            }
        };

        let boosted = SchedAttr::deadline(self.deadline_runtime_ns, self.deadline_period_ns);
        if let Err(e) = self.backend.set_attr(tid, &boosted) {
            self.active.release(tid);
            return Err(BoostError::ApplyFailed(tid, e));
        }

        Ok(saved)
    }

    /// Step 4-5 of the deadline sequence (shared with the vectorized path):
    /// restore the saved attributes and clear `active_boosters`
    /// unconditionally.
    fn close_session(&self, tid: Tid, saved: &SchedAttr) -> BoostOutcome {
        let outcome = match self.backend.set_attr(tid, saved) {
            Ok(()) => BoostOutcome::Restored,
            Err(e) => classify_restore_failure(tid, e),
        };
        self.active.release(tid);
        outcome
    }

    /// Fixed-priority emulation of bounded CPU consumption: repeated
    /// `runtime`-out-of-`period` quanta at FIFO priority until the
    /// cumulative elapsed time reaches `boost_duration` (spec §4.5).
    fn fixed_priority_boost(&self, tid: Tid, shutdown: &Shutdown) -> Result<BoostOutcome, BoostError> {
        if !self.active.try_acquire(tid) {
            return Err(BoostError::AlreadyBoosted(tid));
        }

        let saved = match self.backend.get_attr(tid) {
            Ok(attr) => attr,
            Err(e) => {
                self.active.release(tid);
                return Err(BoostError::ReadFailed(tid, e));
            }
        };

        let boosted = SchedAttr::fifo(self.fixed_priority);
        let runtime = Duration::from_nanos(self.deadline_runtime_ns);
        let idle = Duration::from_nanos(self.deadline_period_ns.saturating_sub(self.deadline_runtime_ns));

        let mut elapsed = Duration::ZERO;
        let mut vanished_or_failed: Option<BoostOutcome> = None;

        while elapsed < self.boost_duration {
            if let Err(e) = self.backend.set_attr(tid, &boosted) {
                vanished_or_failed = Some(classify_restore_failure(tid, e));
                break;
            }
            if !shutdown.sleep(runtime) {
                break;
            }

            if let Err(e) = self.backend.set_attr(tid, &saved) {
                vanished_or_failed = Some(classify_restore_failure(tid, e));
                break;
            }
            elapsed += runtime;
            if elapsed >= self.boost_duration {
                break;
            }
            if !shutdown.sleep(idle) {
                break;
            }
            elapsed += idle;
        }

        let outcome = match vanished_or_failed {
            Some(outcome) => outcome,
            None => self.close_session(tid, &saved),
        };
        if vanished_or_failed.is_some() {
            self.active.release(tid);
        }
        Ok(outcome)
    }

    /// Opens deadline sessions for every target before sleeping once for
    /// the common boost duration, then restores all. Only valid with the
    /// deadline method; startup validation (spec §4.5, §4.6) guarantees
    /// this is never reached with fixed-priority in force.
    pub fn boost_vector(
        &self,
        tids: &[Tid],
        shutdown: &Shutdown,
    ) -> Vec<(Tid, Result<BoostOutcome, BoostError>)> {
        debug_assert_eq!(
            self.method,
            Method::Deadline,
            "boost_vector requires the deadline method"
        );

        let mut opened = Vec::with_capacity(tids.len());
        for &tid in tids {
            opened.push((tid, self.open_deadline_session(tid)));
        }

        shutdown.sleep(self.boost_duration);

        opened
            .into_iter()
            .map(|(tid, saved)| match saved {
                Ok(saved) => (tid, Ok(self.close_session(tid, &saved))),
                Err(e) => (tid, Err(e)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeBackend {
        attrs: StdMutex<std::collections::HashMap<Tid, SchedAttr>>,
        fail_get: StdMutex<HashSet<Tid>>,
        fail_set_once: StdMutex<HashSet<Tid>>,
        vanish_on_restore: StdMutex<HashSet<Tid>>,
    }

    impl FakeBackend {
        fn with_attr(tid: Tid, attr: SchedAttr) -> Self {
            let me = Self::default();
            me.attrs.lock().unwrap().insert(tid, attr);
            me
        }
    }

    impl SchedBackend for FakeBackend {
        fn get_attr(&self, tid: Tid) -> std::io::Result<SchedAttr> {
            if self.fail_get.lock().unwrap().contains(&tid) {
                return Err(std::io::Error::from_raw_os_error(libc::EPERM));
            }
            Ok(*self.attrs.lock().unwrap().entry(tid).or_insert_with(SchedAttr::new))
        }

        fn set_attr(&self, tid: Tid, attr: &SchedAttr) -> std::io::Result<()> {
            if self.vanish_on_restore.lock().unwrap().contains(&tid) {
                return Err(std::io::Error::from_raw_os_error(libc::ESRCH));
            }
            if self.fail_set_once.lock().unwrap().remove(&tid) {
                return Err(std::io::Error::from_raw_os_error(libc::EPERM));
            }
            self.attrs.lock().unwrap().insert(tid, *attr);
            Ok(())
        }
    }

    fn engine(backend: Arc<dyn SchedBackend>, method: Method) -> BoostEngine {
        BoostEngine::new(
            backend,
            ActiveBoosters::new(),
            method,
            20_000,
            1_000_000_000,
            98,
            Duration::from_millis(5),
        )
    }

    #[test]
    fn deadline_boost_restores_saved_attr_and_clears_booster() {
        let original = SchedAttr::fifo(10);
        let backend: Arc<dyn SchedBackend> = Arc::new(FakeBackend::with_attr(42, original));
        let eng = engine(backend.clone(), Method::Deadline);

        let outcome = eng.boost_one(42, &Shutdown::new()).unwrap();
        assert_eq!(outcome, BoostOutcome::Restored);
        assert!(!eng.active.contains(42));

        let restored = backend.get_attr(42).unwrap();
        assert_eq!(restored.sched_policy, original.sched_policy);
        assert_eq!(restored.sched_priority, original.sched_priority);
    }

    #[test]
    fn concurrent_boost_of_same_tid_is_rejected() {
        let backend: Arc<dyn SchedBackend> = Arc::new(FakeBackend::with_attr(7, SchedAttr::new()));
        let eng = engine(backend, Method::Deadline);
        assert!(eng.active.try_acquire(7));
        let result = eng.boost_one(7, &Shutdown::new());
        assert!(matches!(result, Err(BoostError::AlreadyBoosted(7))));
    }

    #[test]
    fn apply_failure_clears_booster_and_opens_no_session() {
        let fake = FakeBackend::with_attr(9, SchedAttr::new());
        fake.fail_set_once.lock().unwrap().insert(9);
        let backend: Arc<dyn SchedBackend> = Arc::new(fake);
        let eng = engine(backend, Method::Deadline);

        let result = eng.boost_one(9, &Shutdown::new());
        assert!(matches!(result, Err(BoostError::ApplyFailed(9, _))));
        assert!(!eng.active.contains(9));
    }

    #[test]
    fn target_vanishing_during_restore_is_not_fatal() {
        // The boosted-attribute apply (1st set_attr) must succeed; only the
        // restore (2nd set_attr) should see the target gone.
        struct VanishOnSecondCall {
            inner: FakeBackend,
            calls: StdMutex<u32>,
        }
        impl SchedBackend for VanishOnSecondCall {
            fn get_attr(&self, tid: Tid) -> std::io::Result<SchedAttr> {
                self.inner.get_attr(tid)
            }
            fn set_attr(&self, tid: Tid, attr: &SchedAttr) -> std::io::Result<()> {
                let mut c = self.calls.lock().unwrap();
                *c += 1;
                if *c >= 2 {
                    Err(std::io::Error::from_raw_os_error(libc::ESRCH))
                } else {
                    self.inner.set_attr(tid, attr)
                }
            }
        }
        let backend: Arc<dyn SchedBackend> = Arc::new(VanishOnSecondCall {
            inner: FakeBackend::with_attr(11, SchedAttr::new()),
            calls: StdMutex::new(0),
        });
        let eng = engine(backend, Method::Deadline);
        let outcome = eng.boost_one(11, &Shutdown::new()).unwrap();
        assert_eq!(outcome, BoostOutcome::TargetVanished);
        assert!(!eng.active.contains(11));
    }

    #[test]
    fn boost_vector_opens_and_restores_all_targets() {
        let backend: Arc<dyn SchedBackend> = Arc::new(FakeBackend::default());
        let eng = engine(backend, Method::Deadline);
        let results = eng.boost_vector(&[1, 2, 3], &Shutdown::new());
        assert_eq!(results.len(), 3);
        for (tid, result) in results {
            assert_eq!(result.unwrap(), BoostOutcome::Restored);
            assert!(!eng.active.contains(tid));
        }
    }

    #[test]
    fn fixed_priority_boost_ends_on_saved_policy() {
        let original = SchedAttr::fifo(5);
        let backend: Arc<dyn SchedBackend> = Arc::new(FakeBackend::with_attr(3, original));
        let eng = engine(backend.clone(), Method::FixedPriority);
        let outcome = eng.boost_one(3, &Shutdown::new()).unwrap();
        assert_eq!(outcome, BoostOutcome::Restored);
        let restored = backend.get_attr(3).unwrap();
        assert_eq!(restored.sched_priority, original.sched_priority);
        assert!(!eng.active.contains(3));
    }
}
